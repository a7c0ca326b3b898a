use std::io::{self, Write};

use serde::Serialize;

use crate::domain::TransferAction;
use crate::pipeline::{ProgressEvent, ProgressSink, TransferReport};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

/// Narrates progress on stderr and prints a coloured summary at the end.
pub struct ConsoleOutput;

impl ConsoleOutput {
    pub fn print_summary(report: &TransferReport) {
        let green = "\x1b[32m";
        let yellow = "\x1b[33m";
        let cyan = "\x1b[36m";
        let red = "\x1b[31m";
        let reset = "\x1b[0m";

        println!("{cyan}bcm-transfer summary{reset}");
        println!(
            "{green}uploaded: {}  already present: {}{reset}",
            report.count(TransferAction::Uploaded),
            report.count(TransferAction::AlreadyPresent)
        );
        let planned = report.count(TransferAction::Planned);
        if planned > 0 {
            println!("{yellow}planned: {planned}{reset}");
        }
        if report.failures() > 0 {
            println!("{red}failed: {}{reset}", report.failures());
        }

        for item in &report.items {
            let color = match item.action {
                TransferAction::Uploaded => green,
                TransferAction::AlreadyPresent => cyan,
                TransferAction::Planned => yellow,
                TransferAction::Failed => red,
            };
            let collection = item.collection.as_deref().unwrap_or("-");
            println!(
                "{color}  {} [{collection}] {} ({}){reset}",
                item.name,
                action_label(item.action),
                item.stage
            );
            if let Some(error) = &item.error {
                println!("{red}    {error}{reset}");
            }
        }
    }
}

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} in {:.1}s", event.message, elapsed.as_secs_f64()),
            None => eprintln!("{}", event.message),
        }
    }
}

/// Silent while running; prints the report as JSON on stdout.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &TransferReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

fn action_label(action: TransferAction) -> &'static str {
    match action {
        TransferAction::Uploaded => "uploaded",
        TransferAction::AlreadyPresent => "already present",
        TransferAction::Planned => "planned",
        TransferAction::Failed => "failed",
    }
}
