use std::collections::HashSet;

use crate::error::Result;
use crate::hash::Oid;
use crate::refs::resolve_ref;
use crate::repo::Repository;
use crate::types::Commit;

/// commit with its id for log output
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub oid: Oid,
    pub commit: Commit,
}

/// commit history reachable from a ref or commit id, newest first
pub fn log(repo: &Repository, rev: &str, max_count: Option<usize>) -> Result<Vec<LogEntry>> {
    let head = resolve_ref(repo, rev)?;
    let mut entries = Vec::new();
    let mut to_visit = vec![head];
    let mut visited = HashSet::new();

    while let Some(oid) = to_visit.pop() {
        if !visited.insert(oid) {
            continue;
        }

        // transactions only build linear histories, walk order is already newest first
        if max_count.is_some_and(|max| entries.len() >= max) {
            break;
        }

        let commit = repo.commit(&oid)?;

        // push in reverse so the first parent is walked first
        for parent in commit.parents.iter().rev() {
            to_visit.push(*parent);
        }

        entries.push(LogEntry { oid, commit });
    }

    // stable sort keeps walk order for equal timestamps
    entries.sort_by(|a, b| b.commit.committer.timestamp.cmp(&a.commit.committer.timestamp));

    if let Some(max) = max_count {
        entries.truncate(max);
    }

    Ok(entries)
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "commit {}", self.oid)?;
        if self.commit.parents.len() > 1 {
            let parents: Vec<String> = self.commit.parents.iter().map(|p| p.to_hex()[..7].to_string()).collect();
            writeln!(f, "Merge: {}", parents.join(" "))?;
        }
        writeln!(f, "Author: {} <{}>", self.commit.author.name, self.commit.author.email)?;

        let author = &self.commit.author;
        match &author.timezone {
            Some(tz) => writeln!(f, "Date:   {} {}", author.timestamp, tz)?,
            None => writeln!(f, "Date:   {}", author.timestamp)?,
        }

        writeln!(f)?;
        for line in self.commit.message.lines() {
            writeln!(f, "    {}", line)?;
        }

        Ok(())
    }
}
