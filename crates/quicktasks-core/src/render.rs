use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Local};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::engine::ListSummary;
use crate::filter::TaskFilter;
use crate::migration::MigrationReport;
use crate::preferences::ResolvedTheme;
use crate::task::{Task, TaskCounts, TaskList};

const SHORT_ID_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    theme: ResolvedTheme,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color,
            theme: ResolvedTheme::Light,
        })
    }

    pub fn set_theme(&mut self, theme: ResolvedTheme) {
        self.theme = theme;
    }

    /// One list's tasks in view order, each under the number it was given.
    #[tracing::instrument(skip(self, list, tasks))]
    pub fn print_tasks(
        &self,
        list: &TaskList,
        tasks: &[(usize, Task)],
        filter: TaskFilter,
        counts: TaskCounts,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{} ({filter})", self.paint(&list.name, self.accent()))?;

        if tasks.is_empty() {
            let message = match filter {
                TaskFilter::All => "No tasks yet.",
                TaskFilter::Active => "Nothing left to do.",
                TaskFilter::Completed => "No completed tasks.",
            };
            writeln!(out, "{message}")?;
        } else {
            let headers = vec![
                "#".to_string(),
                "ID".to_string(),
                "Done".to_string(),
                "Title".to_string(),
                "Added".to_string(),
            ];

            let rows = tasks
                .iter()
                .map(|(number, task)| {
                    let done = if task.completed {
                        self.paint("x", "32")
                    } else {
                        String::new()
                    };
                    let title = if task.completed {
                        self.paint(&task.title, "2")
                    } else {
                        task.title.clone()
                    };
                    vec![
                        self.paint(&number.to_string(), self.accent()),
                        short_id(&task.id).to_string(),
                        done,
                        title,
                        format_date(task.created_at),
                    ]
                })
                .collect();

            write_table(&mut out, headers, rows)?;
        }

        writeln!(out)?;
        writeln!(
            out,
            "{} active, {} completed, {} total",
            counts.active, counts.completed, counts.total
        )?;
        Ok(())
    }

    /// The overview: every list with its item and pending counts.
    #[tracing::instrument(skip(self, summaries))]
    pub fn print_lists(&self, summaries: &[ListSummary], active: Option<&str>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let headers = vec![
            "#".to_string(),
            "ID".to_string(),
            "Name".to_string(),
            "Items".to_string(),
            "Pending".to_string(),
        ];

        let rows = summaries
            .iter()
            .enumerate()
            .map(|(idx, summary)| {
                let marker = if active == Some(summary.list.id.as_str()) {
                    "*"
                } else {
                    ""
                };
                let items = match summary.counts.total {
                    1 => "1 item".to_string(),
                    n => format!("{n} items"),
                };
                vec![
                    self.paint(&format!("{}{marker}", idx + 1), self.accent()),
                    short_id(&summary.list.id).to_string(),
                    summary.list.name.clone(),
                    items,
                    summary.counts.active.to_string(),
                ]
            })
            .collect();

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    pub fn print_migration(&self, report: &MigrationReport) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if report.is_complete() {
            writeln!(
                out,
                "Moved {} task(s) and {} list(s) from this device to your account.",
                report.tasks_copied, report.lists_created
            )?;
        } else {
            writeln!(
                out,
                "{}",
                self.paint(
                    &format!(
                        "Migration incomplete: {} write(s) failed. Local data was kept and will be retried on the next sign-in.",
                        report.failures
                    ),
                    "31"
                )
            )?;
        }
        Ok(())
    }

    pub fn print_saving(&self) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{}", self.paint("Saving...", "2"))?;
        Ok(())
    }

    fn accent(&self) -> &'static str {
        match self.theme {
            ResolvedTheme::Light => "34",
            ResolvedTheme::Dark => "96",
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

/// Dark terminals advertise their background through `COLORFGBG`
/// (`fg;bg`, where a bg of 0-6 or 8 is dark).
pub fn system_prefers_dark() -> bool {
    let Ok(value) = std::env::var("COLORFGBG") else {
        return false;
    };
    value
        .rsplit(';')
        .next()
        .and_then(|bg| bg.parse::<u8>().ok())
        .is_some_and(|bg| bg < 7 || bg == 8)
}

pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(SHORT_ID_LEN) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

fn format_date(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|date| date.with_timezone(&Local).format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    let mut line = String::new();
    for (idx, header) in headers.iter().enumerate() {
        line.push_str(&pad(header, widths[idx]));
    }
    writeln!(writer, "{}", line.trim_end())?;

    line.clear();
    for width in &widths {
        line.push_str(&"-".repeat(*width));
        line.push(' ');
    }
    writeln!(writer, "{}", line.trim_end())?;

    for row in rows {
        line.clear();
        for (idx, width) in widths.iter().enumerate() {
            let cell = row.get(idx).map(String::as_str).unwrap_or_default();
            line.push_str(&pad(cell, *width));
        }
        writeln!(writer, "{}", line.trim_end())?;
    }

    Ok(())
}

// Pads by display width so wide glyphs and colour codes line up.
fn pad(cell: &str, width: usize) -> String {
    let visible = UnicodeWidthStr::width(strip_ansi(cell).as_str());
    format!("{cell}{} ", " ".repeat(width.saturating_sub(visible)))
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
