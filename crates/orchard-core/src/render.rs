use std::io::{self, IsTerminal, Write};

use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::fruit::{FRUITS, Fruit, fruit_for};
use crate::task::Task;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color = cfg.get_bool("color")?.unwrap_or(true) && io::stdout().is_terminal();
        Ok(Self { color })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip(self, tasks))]
    pub fn print_task_table(&self, tasks: &[Task]) -> anyhow::Result<()> {
        self.write_task_table(io::stdout().lock(), tasks)
    }

    #[tracing::instrument(skip(self, task))]
    pub fn print_task_info(&self, task: &Task) -> anyhow::Result<()> {
        self.write_task_info(io::stdout().lock(), task)
    }

    #[tracing::instrument(skip(self))]
    pub fn print_legend(&self) -> anyhow::Result<()> {
        self.write_legend(io::stdout().lock())
    }

    pub fn write_task_table<W: Write>(&self, mut out: W, tasks: &[Task]) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }

        let headers = ["ID", "Done", "Importance", "Text"].map(str::to_string).to_vec();
        let rows = tasks
            .iter()
            .map(|task| {
                let done = if task.completed { "[x]" } else { "[ ]" };
                vec![
                    task.id.to_string(),
                    done.to_string(),
                    self.paint_fruit(fruit_for(task.importance), task.importance.label()),
                    task.text.clone(),
                ]
            })
            .collect();

        write_table(&mut out, headers, rows)?;

        let open = tasks.iter().filter(|task| !task.completed).count();
        writeln!(out)?;
        writeln!(out, "{} task(s), {open} open", tasks.len())?;
        Ok(())
    }

    pub fn write_task_info<W: Write>(&self, mut out: W, task: &Task) -> anyhow::Result<()> {
        let fruit = fruit_for(task.importance);
        writeln!(out, "id          {}", task.id)?;
        writeln!(out, "text        {}", task.text)?;
        writeln!(
            out,
            "completed   {}",
            if task.completed { "yes" } else { "no" }
        )?;
        writeln!(
            out,
            "importance  {}",
            self.paint_fruit(fruit, task.importance.label())
        )?;
        writeln!(out, "radius      {}", fruit.radius)?;
        writeln!(out, "color       {}", fruit.color)?;
        Ok(())
    }

    pub fn write_legend<W: Write>(&self, mut out: W) -> anyhow::Result<()> {
        let headers = ["Importance", "Radius", "Color"].map(str::to_string).to_vec();
        let rows = FRUITS
            .iter()
            .map(|fruit| {
                vec![
                    self.paint_fruit(fruit, fruit.label()),
                    fruit.radius.to_string(),
                    fruit.color.to_string(),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)
    }

    fn paint_fruit(&self, fruit: &Fruit, text: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        let (r, g, b) = fruit.rgb();
        format!("\x1b[38;2;{r};{g};{b}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, &width) in headers.iter().zip(&widths) {
        write!(writer, "{header:width$} ")?;
    }
    writeln!(writer)?;

    for &width in &widths {
        write!(writer, "{:-<width$} ", "")?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, &width) in row.iter().zip(&widths) {
            let visible = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible);
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
            escaped = ch != 'm';
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
