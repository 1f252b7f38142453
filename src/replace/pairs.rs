use std::fs::File;
use std::io::Read;
use std::path::Path;
use log::warn;
use regex::{NoExpand, Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use crate::core::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacePair {
    pub search: String,
    pub replace: String,
}

impl ReplacePair {
    pub fn new(search: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            search: search.into(),
            replace: replace.into(),
        }
    }
}

/// How `search` is matched against text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    Literal,
    CaseInsensitive,
    /// `search` is a regular expression, `replace` may use `$1`/`${name}`.
    Regex,
}

/// Ordered replacement pairs, applied one after another to every string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacePairs {
    pairs: Vec<ReplacePair>,
    batch: bool,
}

impl ReplacePairs {
    pub fn single(search: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            pairs: vec![ReplacePair::new(search, replace)],
            batch: false,
        }
    }

    pub fn batch(pairs: Vec<ReplacePair>) -> Self {
        Self { pairs, batch: true }
    }

    /// Two-column CSV, `search,replace`. A `search,replace` header row is
    /// skipped when present.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut pairs = Vec::new();
        for (idx, record) in csv.records().enumerate() {
            let record = record?;
            if record.len() != 2 {
                return Err(Error::Validation(format!(
                    "Replacement CSV line {} has {} field(s), expected 2",
                    idx + 1,
                    record.len()
                )));
            }
            let (search, replace) = (&record[0], &record[1]);
            if idx == 0
                && search.eq_ignore_ascii_case("search")
                && replace.eq_ignore_ascii_case("replace")
            {
                continue;
            }
            pairs.push(ReplacePair::new(search, replace));
        }
        Ok(Self::batch(pairs))
    }

    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            Error::Validation(format!("Cannot open replacement CSV {}: {}", path.display(), e))
        })?;
        Self::from_csv_reader(file)
    }

    pub fn pairs(&self) -> &[ReplacePair] {
        &self.pairs
    }

    pub fn is_batch(&self) -> bool {
        self.batch
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.pairs.is_empty() {
            return Err(Error::Validation("No replacement pairs given".into()));
        }
        if let (false, [pair]) = (self.batch, self.pairs.as_slice()) {
            if pair.search.is_empty() {
                return Err(Error::Validation("Search string cannot be empty".into()));
            }
            if pair.search == pair.replace {
                return Err(Error::Validation(format!(
                    "Search and replace strings are identical ('{}')",
                    pair.search
                )));
            }
        }
        Ok(())
    }

    /// Validate and build matchers. Pairs with an empty search are dropped.
    pub fn compile(&self, mode: MatchMode) -> Result<Vec<Matcher>> {
        self.validate()?;
        let mut matchers = Vec::with_capacity(self.pairs.len());
        for pair in &self.pairs {
            if pair.search.is_empty() {
                warn!("Ignoring replacement pair with an empty search string");
                continue;
            }
            matchers.push(Matcher::new(pair, mode)?);
        }
        Ok(matchers)
    }
}

/// A compiled replacement pair.
#[derive(Debug, Clone)]
pub enum Matcher {
    Literal { search: String, replace: String },
    Pattern { regex: Regex, replace: String, expand: bool },
}

impl Matcher {
    pub fn new(pair: &ReplacePair, mode: MatchMode) -> Result<Self> {
        match mode {
            MatchMode::Literal => Ok(Self::Literal {
                search: pair.search.clone(),
                replace: pair.replace.clone(),
            }),
            MatchMode::CaseInsensitive => {
                let regex = RegexBuilder::new(&regex::escape(&pair.search))
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| Error::Validation(format!("Invalid search string: {}", e)))?;
                Ok(Self::Pattern {
                    regex,
                    replace: pair.replace.clone(),
                    expand: false,
                })
            }
            MatchMode::Regex => {
                let regex = Regex::new(&pair.search).map_err(|e| {
                    Error::Validation(format!("Invalid search pattern '{}': {}", pair.search, e))
                })?;
                Ok(Self::Pattern {
                    regex,
                    replace: pair.replace.clone(),
                    expand: true,
                })
            }
        }
    }

    pub fn is_match(&self, text: &str) -> bool {
        match self {
            Self::Literal { search, .. } => text.contains(search.as_str()),
            Self::Pattern { regex, .. } => regex.is_match(text),
        }
    }

    /// Replace every match. `None` when nothing matched.
    pub fn apply(&self, text: &str) -> Option<String> {
        if !self.is_match(text) {
            return None;
        }
        Some(match self {
            Self::Literal { search, replace } => text.replace(search.as_str(), replace),
            Self::Pattern { regex, replace, expand: true } => {
                regex.replace_all(text, replace.as_str()).into_owned()
            }
            Self::Pattern { regex, replace, expand: false } => {
                regex.replace_all(text, NoExpand(replace)).into_owned()
            }
        })
    }
}
