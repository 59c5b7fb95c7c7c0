use std::fmt;

/// Several independent failures from one reconcile pass.
///
/// Each error stays individually accessible; [`fmt::Display`] joins them.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<anyhow::Error>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: anyhow::Error) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &anyhow::Error> {
        self.errors.iter()
    }

    pub fn into_inner(self) -> Vec<anyhow::Error> {
        self.errors
    }

    /// `Ok(())` when nothing was collected.
    pub fn into_result(self) -> Result<(), MultiError> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => write!(f, "no errors"),
            [single] => write!(f, "{:#}", single),
            errors => {
                write!(f, "{} errors occurred:", errors.len())?;
                for error in errors {
                    write!(f, "\n\t* {:#}", error)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for MultiError {}

impl From<anyhow::Error> for MultiError {
    fn from(error: anyhow::Error) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl IntoIterator for MultiError {
    type Item = anyhow::Error;
    type IntoIter = std::vec::IntoIter<anyhow::Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

/// Policy refused a version requested on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDenied {
    pub package: String,
    pub version: String,
}

impl fmt::Display for PolicyDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "version {} of {} is blocked by policy",
            self.version, self.package
        )
    }
}

impl std::error::Error for PolicyDenied {}
