use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;

use crate::agenda::{AgendaRow, Bucket};
use crate::config::Config;
use crate::label::{LabelKind, Severity, TimeLabel, label};
use crate::task::Task;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    /// Prints rows grouped under a heading per bucket, in the order given.
    #[tracing::instrument(skip(self, rows, now))]
    pub fn print_agenda(&mut self, rows: &[AgendaRow<'_>], now: DateTime<Utc>, grouped: bool) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        if rows.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "Title".to_string(),
            "Due".to_string(),
            "When".to_string(),
            "Folder".to_string(),
        ];

        let mut current: Option<Bucket> = None;
        let mut section: Vec<Vec<String>> = Vec::new();

        for row in rows {
            if grouped && current != Some(row.bucket) {
                if let Some(bucket) = current {
                    writeln!(out, "{}", self.paint(bucket_heading(bucket), "1"))?;
                    write_table(&mut out, &headers, std::mem::take(&mut section))?;
                    writeln!(out)?;
                }
                current = Some(row.bucket);
            }

            let period_start = row
                .task
                .recurrence
                .as_ref()
                .and_then(|r| r.period_start)
                .map(|p| p.instant());
            let time_label = if row.bucket == Bucket::Completed {
                None
            } else {
                Some(label(row.resolved, now, period_start))
            };

            let when = time_label
                .as_ref()
                .map(|l| self.paint(&describe(l), severity_color(l.severity)))
                .unwrap_or_default();

            section.push(vec![
                self.paint(short_id(&row.task.id), "33"),
                row.task.title.clone(),
                format_due(row.resolved, row.all_day),
                when,
                row.task.folder.clone().unwrap_or_default(),
            ]);
        }

        if let Some(bucket) = current.filter(|_| grouped) {
            writeln!(out, "{}", self.paint(bucket_heading(bucket), "1"))?;
        }
        write_table(&mut out, &headers, section)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, task, next, now))]
    pub fn print_task_info(&mut self, task: &Task, next: Option<DateTime<Utc>>, now: DateTime<Utc>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id         {}", task.id)?;
        writeln!(out, "title      {}", task.title)?;
        if let Some(memo) = &task.memo {
            writeln!(out, "memo       {memo}")?;
        }
        if let Some(folder) = &task.folder {
            writeln!(out, "folder     {folder}")?;
        }
        writeln!(out, "priority   {}", task.priority)?;
        if let Some(order) = task.custom_order {
            writeln!(out, "order      {order}")?;
        }
        if let Some(deadline) = &task.deadline {
            writeln!(out, "deadline   {deadline}")?;
        }

        if task.undecoded_recurrence().is_some() {
            writeln!(out, "repeats    unreadable schedule, kept as stored")?;
        }

        if let Some(settings) = &task.recurrence {
            writeln!(out, "repeats    {}", settings.rule.name())?;
            writeln!(out, "anchor     {}", format_due(Some(settings.anchor_instant()), settings.is_all_day()))?;
            if let Some(start) = settings.period_start {
                writeln!(out, "starts     {}", format_due(Some(start.instant()), start.time.is_none()))?;
            }
            if settings.is_repeating() {
                let next_text = next
                    .map(|n| format_due(Some(n), settings.is_all_day()))
                    .unwrap_or_else(|| "none".to_string());
                writeln!(out, "next       {next_text}")?;
                let done: Vec<String> = task.completed_instance_dates.iter().map(|k| k.to_string()).collect();
                writeln!(out, "completed  {}", done.join(", "))?;
            }
        }

        if let Some(done) = task.completed_at {
            writeln!(out, "done at    {}", done.format("%Y-%m-%d %H:%M"))?;
        } else {
            let due = if task.is_repeating() { next } else { crate::due::resolve_due(task) };
            let period_start = task.recurrence.as_ref().and_then(|r| r.period_start).map(|p| p.instant());
            writeln!(out, "status     {}", describe(&label(due, now, period_start)))?;
        }

        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

/// English text for a label.
pub fn describe(l: &TimeLabel) -> String {
    let n = |name: &str| l.number(name).unwrap_or_default();
    match l.kind {
        LabelKind::StartsInMinutes => format!("starts in {}", plural(n("minutes"), "minute")),
        LabelKind::StartsInHours => format!("starts in {}", plural(n("hours"), "hour")),
        LabelKind::StartsInDays => format!("starts in {}", plural(n("days"), "day")),
        LabelKind::StartsTomorrow => "starts tomorrow".to_string(),
        LabelKind::StartsOnDate => format!("starts on {}", l.text("date").unwrap_or_default()),
        LabelKind::NoDeadline => "no deadline".to_string(),
        LabelKind::OverdueMinutes => format!("{} overdue", plural(n("minutes"), "minute")),
        LabelKind::OverdueHours => format!("{} overdue", plural(n("hours"), "hour")),
        LabelKind::OverdueDays => format!("{} overdue", plural(n("days"), "day")),
        LabelKind::DueNow => "due now".to_string(),
        LabelKind::RemainingMinutes => format!("{} left", plural(n("minutes"), "minute")),
        LabelKind::RemainingHours => format!("{} left", plural(n("hours"), "hour")),
        LabelKind::RemainingDays => format!("{} left", plural(n("days"), "day")),
        LabelKind::RemainingMonths => compound(n("months"), "month", n("days"), "day"),
        LabelKind::RemainingYears => compound(n("years"), "year", n("months"), "month"),
    }
}

fn compound(major: i64, major_unit: &str, minor: i64, minor_unit: &str) -> String {
    if minor == 0 {
        format!("{} left", plural(major, major_unit))
    } else {
        format!("{} {} left", plural(major, major_unit), plural(minor, minor_unit))
    }
}

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("1 {unit}")
    } else {
        format!("{count} {unit}s")
    }
}

fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Overdue => "31",
        Severity::Critical => "91",
        Severity::Warning => "33",
        Severity::Neutral => "0",
    }
}

fn bucket_heading(bucket: Bucket) -> &'static str {
    match bucket {
        Bucket::Expired => "Expired",
        Bucket::Today => "Today",
        Bucket::Tomorrow => "Tomorrow",
        Bucket::ThisWeek => "Within 7 days",
        Bucket::Later => "Later",
        Bucket::Undated => "No deadline",
        Bucket::Completed => "Completed",
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn format_due(resolved: Option<DateTime<Utc>>, all_day: bool) -> String {
    match resolved {
        Some(dt) if all_day => dt.format("%Y-%m-%d").to_string(),
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => String::new(),
    }
}

fn write_table<W: Write>(mut writer: W, headers: &[String], rows: Vec<Vec<String>>) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, width) in headers.iter().zip(widths.iter().copied()) {
        write!(writer, "{header:width$} ")?;
    }
    writeln!(writer)?;

    for width in widths.iter().copied() {
        write!(writer, "{:-<width$} ", "")?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, width) in row.iter().zip(widths.iter().copied()) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
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
