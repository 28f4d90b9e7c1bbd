use std::path::Path;

/// Allow-lists deciding which leaves get unified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QualificationRule {
    extensions: Vec<String>,
    exact_names: Vec<String>,
}

impl QualificationRule {
    pub fn new<E, N>(extensions: E, exact_names: N) -> Self
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
        N: IntoIterator,
        N::Item: AsRef<str>,
    {
        Self {
            extensions: clean_entries(extensions),
            exact_names: clean_entries(exact_names),
        }
    }

    /// Builds a rule from the semicolon-separated option strings.
    pub fn from_lists(extensions: &str, exact_names: &str) -> Self {
        Self::new(extensions.split(';'), exact_names.split(';'))
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn exact_names(&self) -> &[String] {
        &self.exact_names
    }

    pub fn qualifies(&self, name: &str) -> bool {
        let lowered = name.to_lowercase();
        if self.exact_names.iter().any(|exact| *exact == lowered) {
            return true;
        }
        if Path::new(&lowered).extension().is_none() {
            // Dotfiles such as `.gitignore` match an extension entry only whole.
            return lowered.starts_with('.') && self.extensions.iter().any(|ext| *ext == lowered);
        }
        self.extensions.iter().any(|ext| lowered.ends_with(ext.as_str()))
    }
}

fn clean_entries<I>(entries: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut cleaned: Vec<String> = entries
        .into_iter()
        .map(|entry| {
            entry
                .as_ref()
                .chars()
                .filter(|ch| !ch.is_whitespace())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|entry| !entry.is_empty())
        .collect();
    cleaned.dedup();
    cleaned
}
