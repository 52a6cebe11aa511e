use std::{
    collections::{BTreeMap, BTreeSet},
    env,
    net::IpAddr,
    path::{Path, PathBuf},
};

use tracing::{debug, info, warn};

use crate::{HostsError, HostsResult, ScopedFile};

/// Environment variable that overrides the hosts file location.
pub const HOSTS_PATH_ENV: &str = "HOSTS_PATH";

/// Platform hosts file location.
pub fn default_hosts_path() -> PathBuf {
    #[cfg(windows)]
    {
        let root = env::var_os("SystemRoot")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(r"C:\Windows"));
        root.join("System32").join("drivers").join("etc").join("hosts")
    }
    #[cfg(not(windows))]
    {
        PathBuf::from("/etc/hosts")
    }
}

fn resolve_hosts_path() -> PathBuf {
    env::var_os(HOSTS_PATH_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(default_hosts_path)
}

/// Line terminator used when writing a section.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    pub fn native() -> Self {
        if cfg!(windows) { LineEnding::CrLf } else { LineEnding::Lf }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }
}

impl Default for LineEnding {
    fn default() -> Self {
        Self::native()
    }
}

/// A named block of `address hostname` lines inside the hosts file.
///
/// The block is delimited by `# Start Section <name>` and
/// `# End Section <name>`. Mappings live in memory until [`flush`], which
/// rewrites the block to match them exactly (or removes it when empty) and
/// leaves the rest of the file alone.
///
/// [`flush`]: HostsSection::flush
#[derive(Clone, Debug)]
pub struct HostsSection {
    name: String,
    file: ScopedFile,
    line_ending: LineEnding,
    hosts: BTreeMap<String, BTreeSet<String>>,
}

impl HostsSection {
    /// Section backed by the system hosts file, or `$HOSTS_PATH` when set.
    pub fn new(name: impl Into<String>) -> HostsResult<Self> {
        Self::with_path(name, resolve_hosts_path())
    }

    pub fn with_path(name: impl Into<String>, path: impl Into<PathBuf>) -> HostsResult<Self> {
        let name = name.into();
        if name.trim().is_empty() || name.contains(['\r', '\n']) {
            return Err(HostsError::InvalidSectionName(name));
        }
        Ok(Self {
            name,
            file: ScopedFile::new(path),
            line_ending: LineEnding::native(),
            hosts: BTreeMap::new(),
        })
    }

    /// Section pre-populated from the block currently persisted under `name`.
    pub fn load(name: impl Into<String>) -> HostsResult<Self> {
        Self::load_from(name, resolve_hosts_path())
    }

    pub fn load_from(name: impl Into<String>, path: impl Into<PathBuf>) -> HostsResult<Self> {
        let mut section = Self::with_path(name, path)?;
        let text = section.file.read_all()?;
        if let Some((start, end)) = section.locate(&text) {
            let body_start = line_end(&text, start);
            let body_end = text[..end].rfind(section.end_sentinel().as_str()).unwrap_or(end);
            for line in text[body_start..body_end].lines() {
                let mut fields = line.split_whitespace();
                let Some(address) = fields.next() else {
                    continue;
                };
                if address.starts_with('#') {
                    continue;
                }
                if address.parse::<IpAddr>().is_err() {
                    warn!(section = %section.name, line, "skipping malformed line in hosts section");
                    continue;
                }
                let names = section.hosts.entry(address.to_string()).or_default();
                names.extend(fields.map(str::to_string));
            }
            section.hosts.retain(|_, names| !names.is_empty());
        }
        Ok(section)
    }

    pub fn with_line_ending(mut self, line_ending: LineEnding) -> Self {
        self.line_ending = line_ending;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Map `address` to exactly `hostnames`, replacing any earlier mapping.
    ///
    /// An empty `hostnames` removes the address.
    pub fn add<I, S>(&mut self, address: &str, hostnames: I) -> HostsResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let address = address.trim();
        if address.parse::<IpAddr>().is_err() {
            return Err(HostsError::InvalidAddress(address.to_string()));
        }
        let mut names = BTreeSet::new();
        for hostname in hostnames {
            let hostname = hostname.as_ref().trim();
            if !is_valid_hostname(hostname) {
                return Err(HostsError::InvalidHostname(hostname.to_string()));
            }
            names.insert(hostname.to_string());
        }
        if names.is_empty() {
            self.hosts.remove(address);
        } else {
            self.hosts.insert(address.to_string(), names);
        }
        Ok(())
    }

    /// Drop the mapping for `address`; returns whether one existed.
    pub fn remove(&mut self, address: &str) -> bool {
        self.hosts.remove(address.trim()).is_some()
    }

    pub fn clear(&mut self) {
        self.hosts.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// `(address, hostname)` pairs in the order they are written.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.hosts
            .iter()
            .flat_map(|(address, names)| names.iter().map(move |name| (address.as_str(), name.as_str())))
    }

    /// Reconcile the persisted block with the in-memory mappings.
    pub fn flush(&self) -> HostsResult<()> {
        let written = self.file.update(|current| self.render(current))?;
        if written {
            info!(
                section = %self.name,
                path = %self.file.path().display(),
                entries = self.entries().count(),
                "hosts section flushed"
            );
        } else {
            debug!(section = %self.name, path = %self.file.path().display(), "hosts section already up to date");
        }
        Ok(())
    }

    /// Flush now and remove the block again when the returned guard drops.
    pub fn into_guard(self) -> HostsResult<SectionGuard> {
        self.flush()?;
        Ok(SectionGuard { section: Some(self) })
    }

    /// Rebuild `current` with this section's block; `None` when nothing changes.
    pub fn render(&self, current: &str) -> Option<String> {
        let ln = self.line_ending.as_str();
        let found = self.locate(current);
        if found.is_none() && self.hosts.is_empty() {
            return None;
        }

        let mut text = match found {
            Some((start, end)) => excise(current, start, end, ln),
            None => current.to_string(),
        };

        if !self.hosts.is_empty() {
            trim_line_endings(&mut text);
            if !text.is_empty() {
                text.push_str(ln);
                text.push_str(ln);
            }
            text.push_str(&self.start_sentinel());
            text.push_str(ln);
            for (address, hostname) in self.entries() {
                text.push_str(address);
                text.push(' ');
                text.push_str(hostname);
                text.push_str(ln);
            }
            text.push_str(&self.end_sentinel());
        }

        trim_line_endings(&mut text);
        if !text.is_empty() {
            text.push_str(ln);
        }
        (text != current).then_some(text)
    }

    fn start_sentinel(&self) -> String {
        format!("# Start Section {}", self.name)
    }

    fn end_sentinel(&self) -> String {
        format!("# End Section {}", self.name)
    }

    /// Byte range of the block, sentinel lines included.
    fn locate(&self, text: &str) -> Option<(usize, usize)> {
        let start_line = self.start_sentinel();
        let end_line = self.end_sentinel();
        let start = text
            .match_indices(start_line.as_str())
            .map(|(idx, _)| idx)
            .find(|&idx| is_whole_line(text, idx, start_line.len()))?;
        let end = text
            .rmatch_indices(end_line.as_str())
            .map(|(idx, _)| idx)
            .find(|&idx| is_whole_line(text, idx, end_line.len()))?;
        (start < end).then(|| (start, line_end(text, end)))
    }
}

/// Removes its section from the hosts file when dropped.
///
/// Removal on drop is best-effort; failures are logged. Use [`release`] to
/// observe the error instead.
///
/// [`release`]: SectionGuard::release
#[derive(Debug)]
pub struct SectionGuard {
    section: Option<HostsSection>,
}

impl SectionGuard {
    /// Remove the block now.
    pub fn release(mut self) -> HostsResult<()> {
        match self.section.take() {
            Some(section) => remove_block(section),
            None => Ok(()),
        }
    }
}

impl Drop for SectionGuard {
    fn drop(&mut self) {
        if let Some(section) = self.section.take() {
            let name = section.name.clone();
            if let Err(err) = remove_block(section) {
                warn!(section = %name, error = %err, "failed to remove hosts section");
            }
        }
    }
}

fn remove_block(mut section: HostsSection) -> HostsResult<()> {
    section.clear();
    section.flush()
}

pub(crate) fn is_valid_hostname(hostname: &str) -> bool {
    !hostname.is_empty() && !hostname.starts_with('#') && !hostname.chars().any(char::is_whitespace)
}

/// Whether `text[idx..idx + len]` spans a full line.
fn is_whole_line(text: &str, idx: usize, len: usize) -> bool {
    let at_line_start = idx == 0 || text[..idx].ends_with('\n');
    let rest = &text[idx + len..];
    at_line_start && (rest.is_empty() || rest.starts_with('\n') || rest.starts_with("\r\n"))
}

/// Index just past the line terminator of the line containing `idx`.
fn line_end(text: &str, idx: usize) -> usize {
    text[idx..].find('\n').map(|off| idx + off + 1).unwrap_or(text.len())
}

/// Cut `text[start..end]` and the blank separator line written before it.
fn excise(text: &str, start: usize, end: usize, ln: &str) -> String {
    let mut before = &text[..start];
    let mut after = &text[end..];
    if let Some(stripped) = before.strip_suffix(ln)
        && (stripped.is_empty() || stripped.ends_with(ln))
    {
        before = stripped;
    }
    if before.is_empty() {
        after = after.strip_prefix(ln).unwrap_or(after);
    }
    format!("{before}{after}")
}

fn trim_line_endings(text: &mut String) {
    let len = text.trim_end_matches(['\r', '\n']).len();
    text.truncate(len);
}

#[cfg(test)]
#[path = "section_tests.rs"]
mod tests;
