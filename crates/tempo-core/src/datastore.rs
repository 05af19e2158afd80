use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::task::Task;

/// JSONL task collection. Every mutation rewrites the whole file; the last
/// writer wins.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub tasks_path: PathBuf,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let tasks_path = data_dir.join("tasks.data");
        if !tasks_path.exists() {
            fs::write(&tasks_path, "")?;
        }

        info!(
            data_dir = %data_dir.display(),
            tasks = %tasks_path.display(),
            "opened datastore"
        );

        Ok(Self { data_dir, tasks_path })
    }

    #[tracing::instrument(skip(self))]
    pub fn load_tasks(&self) -> anyhow::Result<Vec<Task>> {
        load_jsonl(&self.tasks_path).context("failed to load tasks.data")
    }

    #[tracing::instrument(skip(self, tasks))]
    pub fn save_tasks(&self, tasks: &[Task]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.tasks_path, tasks).context("failed to save tasks.data")
    }

    #[tracing::instrument(skip(self, task), fields(id = %task.id))]
    pub fn add_task(&self, task: Task) -> anyhow::Result<Vec<Task>> {
        let mut tasks = self.load_tasks()?;
        if tasks.iter().any(|t| t.id == task.id) {
            return Err(anyhow!("task id already exists: {}", task.id));
        }
        tasks.push(task);
        self.save_tasks(&tasks)?;
        Ok(tasks)
    }

    /// Swaps in a whole replacement record with the same id.
    #[tracing::instrument(skip(self, task), fields(id = %task.id))]
    pub fn replace_task(&self, task: Task) -> anyhow::Result<()> {
        let mut tasks = self.load_tasks()?;
        let slot = tasks
            .iter_mut()
            .find(|t| t.id == task.id)
            .ok_or_else(|| anyhow!("task not found: {}", task.id))?;
        *slot = task;
        self.save_tasks(&tasks)
    }

    #[tracing::instrument(skip(self))]
    pub fn remove_task(&self, id: &str) -> anyhow::Result<Task> {
        let mut tasks = self.load_tasks()?;
        let idx = tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| anyhow!("task not found: {id}"))?;
        let removed = tasks.remove(idx);
        self.save_tasks(&tasks)?;
        info!(remaining = tasks.len(), "removed task");
        Ok(removed)
    }
}

/// Resolves a full id or a unique id prefix.
pub fn find_task<'a>(tasks: &'a [Task], id_or_prefix: &str) -> anyhow::Result<&'a Task> {
    let needle = id_or_prefix.trim();
    if needle.is_empty() {
        return Err(anyhow!("task id cannot be empty"));
    }
    if let Some(exact) = tasks.iter().find(|t| t.id == needle) {
        return Ok(exact);
    }

    let mut matches = tasks.iter().filter(|t| t.id.starts_with(needle));
    let first = matches.next().ok_or_else(|| anyhow!("no task matches id {needle}"))?;
    if matches.next().is_some() {
        return Err(anyhow!("id prefix {needle} is ambiguous"));
    }
    Ok(first)
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> anyhow::Result<Vec<Task>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let task: Task = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(task);
    }

    debug!(count = out.len(), "loaded tasks from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, tasks))]
fn save_jsonl_atomic(path: &Path, tasks: &[Task]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = tasks.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for task in tasks {
        let serialized = serde_json::to_string(task)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::{DataStore, find_task};
    use crate::task::Task;

    fn task(id: &str, title: &str) -> Task {
        let mut task = Task::new(title.to_string());
        task.id = id.to_string();
        task
    }

    #[test]
    fn add_replace_remove() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");

        store.add_task(task("abc1", "First")).expect("add first");
        store.add_task(task("abd2", "Second")).expect("add second");
        assert!(store.add_task(task("abc1", "Dup")).is_err());

        let mut edited = task("abc1", "First, edited");
        edited.priority = 5;
        store.replace_task(edited.clone()).expect("replace");

        let tasks = store.load_tasks().expect("load");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0], edited);

        let removed = store.remove_task("abd2").expect("remove");
        assert_eq!(removed.title, "Second");
        assert_eq!(store.load_tasks().expect("load").len(), 1);
        assert!(store.remove_task("abd2").is_err());
    }

    #[test]
    fn id_prefixes_must_be_unique() {
        let tasks = vec![task("abc1", "First"), task("abd2", "Second")];
        assert_eq!(find_task(&tasks, "abc").expect("unique prefix").title, "First");
        assert_eq!(find_task(&tasks, "abd2").expect("exact").title, "Second");
        assert!(find_task(&tasks, "ab").is_err());
        assert!(find_task(&tasks, "zz").is_err());
        assert!(find_task(&tasks, " ").is_err());
    }
}
