use anyhow::Result;
use serde::Serialize;
use spanreport::{PageSummary, ReportOutput, format_decimal};

pub struct CliLogger {
    json: bool,
    no_color: bool,
}

impl CliLogger {
    pub fn new(json: bool, no_color: bool) -> Self {
        Self { json, no_color }
    }

    pub fn print_output(&self, output: &ReportOutput) -> Result<()> {
        match output {
            ReportOutput::Table(table) => self.print_table(table),
            ReportOutput::Pages(pages) => self.print_pages(pages),
        }
    }

    /// Report tables go to stdout untouched so they can be piped.
    fn print_table(&self, table: &str) -> Result<()> {
        if self.json {
            println!("{}", serde_json::json!({ "report": table }));
            return Ok(());
        }
        print!("{table}");
        Ok(())
    }

    fn print_pages(&self, pages: &[PageSummary]) -> Result<()> {
        if self.json {
            return self.print_serialized(&pages);
        }
        if pages.is_empty() {
            self.print_warning("no stored pages");
            return Ok(());
        }

        let lines: Vec<String> = pages.iter().map(|page| self.page_line(page)).collect();
        println!("{}", lines.join("\n"));
        Ok(())
    }

    fn page_line(&self, page: &PageSummary) -> String {
        format!(
            "{} {} {}ms {}q {}o code {}ms {}",
            self.style(&page.id, "90"),
            self.style(&page.name, "37;1"),
            format_decimal(page.duration_ms, 1),
            page.queries,
            page.other_hits,
            format_decimal(page.code_ms, 1),
            self.style(page.started_at.as_deref().unwrap_or("-"), "90"),
        )
    }

    fn print_serialized<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string(value)?);
        Ok(())
    }

    pub fn print_error(&self, msg: &str) {
        if self.json {
            let out = serde_json::json!({
                "status": "error",
                "message": msg,
            });
            println!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.style("error", "31;1"));
    }

    pub fn print_warning(&self, msg: &str) {
        if self.json {
            let out = serde_json::json!({
                "status": "warning",
                "message": msg,
            });
            eprintln!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.style("warn", "33;1"));
    }

    fn style(&self, text: &str, ansi: &str) -> String {
        if self.no_color {
            return text.to_string();
        }
        format!("\x1b[{ansi}m{text}\x1b[0m")
    }
}
