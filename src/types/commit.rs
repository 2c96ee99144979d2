use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::hash::Oid;

/// author or committer identity with time information
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
    /// unix timestamp (seconds since epoch), 0 when absent
    pub timestamp: i64,
    /// offset such as `+0100`
    pub timezone: Option<String>,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            timestamp,
            timezone: None,
        }
    }

    /// signature stamped with the current time in UTC
    pub fn now(name: impl Into<String>, email: impl Into<String>) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self::new(name, email, timestamp).with_timezone("+0000")
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}> {}", self.name, self.email, self.timestamp)?;
        if let Some(tz) = &self.timezone {
            write!(f, " {}", tz)?;
        }
        Ok(())
    }
}

impl FromStr for Signature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidSignature(s.to_string());

        let email_start = s.find('<').ok_or_else(invalid)?;
        let email_end = s.find('>').ok_or_else(invalid)?;
        if email_start >= email_end {
            return Err(invalid());
        }

        let name = s[..email_start].trim_matches(' ').to_string();
        let email = s[email_start + 1..email_end].to_string();

        let time_info = s[email_end + 1..].trim();
        let mut timestamp = 0;
        let mut timezone = None;
        if !time_info.is_empty() {
            let mut parts = time_info.split(' ');
            let ts = parts.next().ok_or_else(invalid)?;
            timestamp = ts.parse::<i64>().map_err(|_| invalid())?;
            timezone = parts.next().map(str::to_string);
            if parts.next().is_some() {
                return Err(invalid());
            }
        }

        Ok(Self {
            name,
            email,
            timestamp,
            timezone,
        })
    }
}

/// a commit object pointing to a tree with metadata
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    /// root tree oid
    pub tree: Oid,
    /// parent commit oids (empty for a root commit)
    pub parents: Vec<Oid>,
    pub author: Signature,
    pub committer: Signature,
    /// message verbatim, including any trailing newline
    pub message: String,
}

impl Commit {
    /// is this an initial commit (no parents)
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// serialize into the commit object payload format
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::with_capacity(256 + self.message.len());
        out.push_str(&format!("tree {}\n", self.tree));
        for parent in &self.parents {
            out.push_str(&format!("parent {}\n", parent));
        }
        out.push_str(&format!("author {}\n", self.author));
        out.push_str(&format!("committer {}\n", self.committer));
        out.push('\n');
        out.push_str(&self.message);
        out.into_bytes()
    }

    /// parse a commit object payload
    ///
    /// header lines run until the first blank line; unknown headers and
    /// continuation lines are skipped. the rest is the message.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::MalformedCommit("commit is not valid utf-8".to_string()))?;

        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;

        let mut rest = text;
        let message = loop {
            let (line, remainder) = match rest.find('\n') {
                Some(i) => (&rest[..i], Some(&rest[i + 1..])),
                None => (rest, None),
            };

            // continuation of a multi-line header (gpgsig, mergetag)
            if line.starts_with(' ') {
                match remainder {
                    Some(r) => {
                        rest = r;
                        continue;
                    }
                    None => break String::new(),
                }
            }

            let line = line.trim();
            if line.is_empty() {
                break remainder.unwrap_or("").to_string();
            }

            let (tag, value) = match line.split_once(' ') {
                Some((tag, value)) => (tag, Some(value)),
                None => (line, None),
            };
            let required = || {
                value.ok_or_else(|| Error::MalformedCommit(format!("{} header has no value", tag)))
            };
            match tag {
                "tree" => tree = Some(Oid::from_hex(required()?)?),
                "parent" => parents.push(Oid::from_hex(required()?)?),
                "author" => author = Some(required()?.parse::<Signature>()?),
                "committer" => committer = Some(required()?.parse::<Signature>()?),
                _ => {}
            }

            match remainder {
                Some(r) => rest = r,
                None => break String::new(),
            }
        };

        Ok(Self {
            tree: tree.ok_or_else(|| Error::MalformedCommit("missing tree header".to_string()))?,
            parents,
            author: author
                .ok_or_else(|| Error::MalformedCommit("missing author header".to_string()))?,
            committer: committer
                .ok_or_else(|| Error::MalformedCommit("missing committer header".to_string()))?,
            message,
        })
    }
}

/// caller supplied part of a commit written by a transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitInfo {
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

impl CommitInfo {
    pub fn new(author: Signature, committer: Signature, message: impl Into<String>) -> Self {
        Self {
            author,
            committer,
            message: message.into(),
        }
    }

    /// same signature as author and committer
    pub fn by(signature: Signature, message: impl Into<String>) -> Self {
        Self::new(signature.clone(), signature, message)
    }

    /// complete into a commit with the given tree and parents
    pub fn into_commit(self, tree: Oid, parents: Vec<Oid>) -> Commit {
        Commit {
            tree,
            parents,
            author: self.author,
            committer: self.committer,
            message: self.message,
        }
    }
}
