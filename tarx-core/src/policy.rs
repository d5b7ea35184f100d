use glob::Pattern;

use crate::error::Result;

/// Include/exclude selection applied to scanned relative names.
#[derive(Clone, Debug, Default)]
pub struct SelectionPolicy {
    pub include: Vec<Pattern>,
    pub exclude: Vec<Pattern>,
}

impl SelectionPolicy {
    /// Build from comma-separated pattern lists as given on the command line.
    pub fn from_lists(include: Option<&str>, exclude: Option<&str>) -> Result<Self> {
        Ok(Self {
            include: compile_list(include)?,
            exclude: compile_list(exclude)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Include first, then exclude.
    pub fn allows(&self, name: &str) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|p| p.matches(name)) {
            return false;
        }
        !self.exclude.iter().any(|p| p.matches(name))
    }
}

fn compile_list(list: Option<&str>) -> Result<Vec<Pattern>> {
    let Some(list) = list else {
        return Ok(Vec::new());
    };
    list.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            // "dir/" means the whole subtree
            if p.ends_with('/') {
                Pattern::new(&format!("{p}*"))
            } else {
                Pattern::new(p)
            }
            .map_err(Into::into)
        })
        .collect()
}
