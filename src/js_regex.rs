use std::fmt;

/// A compiled regular expression literal (`/pattern/flags`) as scripts see it.
#[derive(Debug, Clone)]
pub(crate) struct JsRegex {
    source: String,
    flags: String,
    backend: fancy_regex::Regex,
}

impl JsRegex {
    pub(crate) fn new(source: &str, flags: &str) -> Result<Self, RegexError> {
        let mut builder = fancy_regex::RegexBuilder::new(&translate_pattern(source));
        for flag in flags.chars() {
            match flag {
                'i' => {
                    builder.case_insensitive(true);
                }
                'm' => {
                    builder.multi_line(true);
                }
                's' => {
                    builder.dot_matches_new_line(true);
                }
                'g' | 'u' | 'y' | 'd' => {}
                other => {
                    return Err(RegexError {
                        message: format!("invalid regular expression flag '{other}'"),
                    });
                }
            }
        }
        let backend = builder.build().map_err(RegexError::from)?;
        Ok(Self {
            source: source.to_string(),
            flags: flags.to_string(),
            backend,
        })
    }

    pub(crate) fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn flags(&self) -> &str {
        &self.flags
    }

    pub(crate) fn is_global(&self) -> bool {
        self.flags.contains('g')
    }

    pub(crate) fn is_match(&self, input: &str) -> Result<bool, RegexError> {
        self.backend.is_match(input).map_err(RegexError::from)
    }

    pub(crate) fn captures_from_pos(
        &self,
        input: &str,
        start: usize,
    ) -> Result<Option<Captures>, RegexError> {
        if start > input.len() {
            return Ok(None);
        }
        let captures = self
            .backend
            .captures_from_pos(input, start)
            .map_err(RegexError::from)?;
        Ok(captures.as_ref().map(Captures::from_backend))
    }

    pub(crate) fn captures_all(&self, input: &str) -> Result<Vec<Captures>, RegexError> {
        let mut out = Vec::new();
        for captures in self.backend.captures_iter(input) {
            let captures = captures.map_err(RegexError::from)?;
            out.push(Captures::from_backend(&captures));
        }
        Ok(out)
    }

    pub(crate) fn split_all(&self, input: &str) -> Result<Vec<String>, RegexError> {
        let mut out = Vec::new();
        for part in self.backend.split(input) {
            out.push(part.map_err(RegexError::from)?.to_string());
        }
        Ok(out)
    }
}

impl fmt::Display for JsRegex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.source, self.flags)
    }
}

// `\/` is legal in literals but meaningless to the backend; `\d` and friends
// stay ASCII like in browsers.
fn translate_pattern(source: &str) -> String {
    let mut out = String::with_capacity(source.len() + 8);
    let mut chars = source.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('/') => out.push('/'),
            Some('d') => out.push_str("[0-9]"),
            Some('D') => out.push_str("[^0-9]"),
            Some('w') => out.push_str("[A-Za-z0-9_]"),
            Some('W') => out.push_str("[^A-Za-z0-9_]"),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push_str("\\\\"),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Captures {
    groups: Vec<Option<Match>>,
}

impl Captures {
    fn from_backend(captures: &fancy_regex::Captures<'_>) -> Self {
        let groups = (0..captures.len())
            .map(|idx| captures.get(idx).map(Match::from_backend))
            .collect();
        Self { groups }
    }

    pub(crate) fn len(&self) -> usize {
        self.groups.len()
    }

    pub(crate) fn get(&self, index: usize) -> Option<&Match> {
        self.groups.get(index).and_then(Option::as_ref)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Match {
    start: usize,
    end: usize,
    text: String,
}

impl Match {
    fn from_backend(matched: fancy_regex::Match<'_>) -> Self {
        Self {
            start: matched.start(),
            end: matched.end(),
            text: matched.as_str().to_string(),
        }
    }

    pub(crate) fn as_str(&self) -> &str {
        self.text.as_str()
    }

    pub(crate) fn start(&self) -> usize {
        self.start
    }

    pub(crate) fn end(&self) -> usize {
        self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RegexError {
    message: String,
}

impl fmt::Display for RegexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RegexError {}

impl From<fancy_regex::Error> for RegexError {
    fn from(value: fancy_regex::Error) -> Self {
        Self {
            message: value.to_string(),
        }
    }
}
