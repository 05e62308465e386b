//! Human-readable task overview.

use tabled::{Table, Tabled, settings::Style};

use crate::task::Task;

#[derive(Tabled)]
struct TaskRow<'a> {
    #[tabled(rename = "Video Id")]
    video_id: &'a str,
    #[tabled(rename = "Channel")]
    channel: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Status")]
    status: &'static str,
    #[tabled(rename = "Progress")]
    progress: &'a str,
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Render `tasks` sorted by status, then video id.
pub fn render_table(tasks: &[Task]) -> String {
    let mut rows: Vec<TaskRow<'_>> = tasks
        .iter()
        .map(|task| TaskRow {
            video_id: &task.id,
            channel: truncate(&task.channel_name, 10),
            title: truncate(&task.title, 30),
            status: task.step.as_str(),
            progress: &task.progress,
        })
        .collect();
    rows.sort_by(|a, b| a.status.cmp(b.status).then_with(|| a.video_id.cmp(b.video_id)));

    Table::new(rows).with(Style::modern()).to_string()
}
