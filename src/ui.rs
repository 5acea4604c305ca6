//! Terminal rendering: header, status lines, the console sink and the
//! confirmation prompt.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use terminal_size::{terminal_size, Height, Width};

use crate::agent::{OutputSink, ToolCall, ToolResult};
use crate::tools::ConfirmationPrompt;

fn rule() -> String {
    let (width, _) = terminal_size().unwrap_or((Width(80), Height(24)));
    "─".repeat(width.0 as usize)
}

/// Title line shown by setup and other one-off commands.
pub fn print_banner(title: &str) {
    let line = rule();
    println!("{}", line.black().bold());
    println!(
        "  {} {}  {}",
        "codeagent".yellow().bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).black().bold(),
        title.cyan()
    );
    println!("{}", line.black().bold());
}

/// Session header: model, provider and working directory.
pub fn print_header(model: &str, provider: &str, workdir: &Path) {
    let line = rule();
    println!("{}", line.black().bold());
    println!(
        "  {} {}",
        "codeagent".yellow().bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).black().bold()
    );
    println!("{}", format!("  {model}  •  {provider}").cyan());
    println!("  {}", workdir.display().to_string().black().bold());
    println!("{}", line.black().bold());
}

/// REPL commands handled before input reaches the agent.
pub const REPL_COMMANDS: &[(&str, &str)] = &[
    ("exit, quit", "end the session"),
    ("clear", "forget the conversation so far"),
    ("continue", "resume a turn that was cancelled, failed or hit the limit"),
    ("help", "show this help"),
];

pub fn print_help() {
    println!("  {}", "Commands:".bold());
    for (name, what) in REPL_COMMANDS {
        println!("    {}  {}", format!("{name:<10}").cyan(), what);
    }
    println!("  Ctrl+C stops the current request; press it twice to quit.");
}

pub fn print_step(msg: &str) {
    println!("  {} {}", "•".green(), msg);
}

pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green().bold(), msg.green());
}

pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠️ ".yellow().bold(), msg.yellow());
}

pub fn print_error(msg: &str) {
    println!("  {} {}", "❌".red().bold(), msg.red());
}

fn spinner(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("  {spinner:.magenta} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("∴∵∴∵ ");
    bar.set_style(style);
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Prints loop output to the terminal.
#[derive(Default)]
pub struct ConsoleSink {
    spinner: Option<ProgressBar>,
    /// Text already printed during the current model call.
    streamed: bool,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn stop_spinner(&mut self) {
        if let Some(bar) = self.spinner.take() {
            bar.finish_and_clear();
        }
    }

    fn end_streamed_line(&mut self) {
        if self.streamed {
            println!();
            self.streamed = false;
        }
    }
}

impl OutputSink for ConsoleSink {
    fn text_chunk(&mut self, chunk: &str) {
        self.stop_spinner();
        if !self.streamed {
            print!("\n  ");
            self.streamed = true;
        }
        print!("{}", chunk.replace('\n', "\n  "));
        let _ = std::io::stdout().flush();
    }

    fn tool_started(&mut self, call: &ToolCall) {
        self.stop_spinner();
        self.end_streamed_line();
        println!("  {} {}", "⚙".cyan(), call.summary().cyan());
    }

    fn tool_finished(&mut self, _call: &ToolCall, result: &ToolResult) {
        let first_line = result.output.lines().next().unwrap_or("").trim();
        let preview: String = first_line.chars().take(100).collect();
        if result.success {
            println!("    {} {}", "✓".green(), preview.black().bold());
        } else {
            let kind = result.error.map(|k| k.to_string()).unwrap_or_else(|| "failed".to_string());
            println!("    {} {}: {}", "✗".red(), kind.red(), preview);
        }
    }

    fn final_answer(&mut self, text: &str) {
        self.stop_spinner();
        if self.streamed {
            self.end_streamed_line();
        } else if !text.trim().is_empty() {
            println!("\n  {}", text.trim().replace('\n', "\n  "));
        }
        println!();
    }

    fn notice(&mut self, text: &str) {
        self.stop_spinner();
        self.end_streamed_line();
        println!("\n  {} {}\n", "⚠️ ".yellow().bold(), text.yellow());
    }

    fn awaiting_model(&mut self, iteration: usize, max_iterations: usize) {
        self.stop_spinner();
        self.end_streamed_line();
        let message = if iteration > 1 {
            format!("Thinking ({iteration}/{max_iterations})")
        } else {
            "Thinking".to_string()
        };
        self.spinner = Some(spinner(message));
    }
}

/// Asks on the terminal before destructive tool calls. Defaults to "no".
pub struct ConsoleConfirm;

impl ConfirmationPrompt for ConsoleConfirm {
    fn ask(&self, call: &ToolCall) -> bool {
        inquire::Confirm::new(&format!("Allow {}?", call.summary()))
            .with_default(false)
            .with_help_message("this action changes or removes files")
            .prompt()
            .unwrap_or(false)
    }
}
