use std::{borrow::Cow, cell::RefCell, fmt::Display};

pub type Message = Cow<'static, str>;

/// A warning, fatal only in strict mode.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Diagnostic {
    pub message: Message,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "warning: {}", self.message)
    }
}

/// Collects every finding of a compilation so they can be reported together.
#[derive(Default)]
pub struct Diagnostics {
    messages: RefCell<Vec<Diagnostic>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn warning(&self, message: impl Into<Message>) {
        self.messages.borrow_mut().push(Diagnostic {
            message: message.into(),
        });
    }
    /// Appends findings gathered elsewhere, skipping exact duplicates.
    pub fn extend(&self, other: impl IntoIterator<Item = Diagnostic>) {
        let mut messages = self.messages.borrow_mut();
        for diagnostic in other {
            if !messages.contains(&diagnostic) {
                messages.push(diagnostic);
            }
        }
    }
    pub fn len(&self) -> usize {
        self.messages.borrow().len()
    }
    pub fn is_empty(&self) -> bool {
        self.messages.borrow().is_empty()
    }
    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.messages.borrow_mut())
    }
}

/// All diagnostics merged into one value, one per line.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Report(pub Vec<Diagnostic>);

impl Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, diagnostic) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{diagnostic}")?;
        }
        Ok(())
    }
}

/// Grammar text the front-end could not read.
#[derive(Clone, PartialEq, Eq, Debug, thiserror::Error)]
#[error("{line}:{column}: {message}")]
pub struct SyntaxError {
    /// One-based.
    pub line: u32,
    /// One-based, in code points.
    pub column: u32,
    pub message: Message,
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error("grammar has no rules")]
    NoRules,
    /// Warnings promoted by strict mode, no source was emitted.
    #[error("{0}")]
    Strict(Report),
    /// The emitted source does not parse, `buffer` holds it unformatted.
    #[error("generated source is malformed: {error}")]
    MalformedSource { error: syn::Error, buffer: String },
    #[error(transparent)]
    Fmt(#[from] std::fmt::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report() {
        let err = Diagnostics::new();
        err.warning("first");
        err.warning(format!("rule '{}' defined but not used", "x"));
        err.extend([Diagnostic {
            message: "first".into(),
        }]);

        let report = Report(err.take());
        assert!(err.is_empty());
        assert_eq!(
            report.to_string(),
            "warning: first\nwarning: rule 'x' defined but not used"
        );
    }

    #[test]
    fn test_syntax_error_position() {
        let error = SyntaxError {
            line: 3,
            column: 1,
            message: "expected `<-`".into(),
        };
        assert_eq!(error.to_string(), "3:1: expected `<-`");
    }
}
