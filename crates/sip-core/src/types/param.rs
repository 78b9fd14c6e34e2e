use std::fmt;

/// A generic `;name[=value]` parameter as used by Via, address headers,
/// Content-Type and friends.
///
/// Names compare case-insensitively. `quoted` records whether the value was
/// (or must be) written as a quoted-string; the stored value is unescaped.
#[derive(Debug, Clone, Eq)]
pub struct Param {
    pub name: String,
    pub value: Option<String>,
    pub quoted: bool,
}

impl Param {
    /// Creates a `name=value` parameter
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            quoted: false,
        }
    }

    /// Creates a valueless parameter such as `;lr` or `;rport`
    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            quoted: false,
        }
    }

    /// Creates a parameter whose value is written as a quoted-string
    pub fn quoted(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            quoted: true,
        }
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl PartialEq for Param {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name) && self.value == other.value
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            None => write!(f, "{}", self.name),
            Some(v) if self.quoted => {
                write!(f, "{}=\"", self.name)?;
                for c in v.chars() {
                    if c == '"' || c == '\\' {
                        write!(f, "\\")?;
                    }
                    write!(f, "{c}")?;
                }
                write!(f, "\"")
            }
            Some(v) => write!(f, "{}={}", self.name, v),
        }
    }
}

/// Writes `;p1;p2=v` for a parameter list
pub fn fmt_params(f: &mut fmt::Formatter<'_>, params: &[Param]) -> fmt::Result {
    for p in params {
        write!(f, ";{p}")?;
    }
    Ok(())
}

/// Finds a parameter by (case-insensitive) name
pub fn find_param<'a>(params: &'a [Param], name: &str) -> Option<&'a Param> {
    params.iter().find(|p| p.is(name))
}

/// Returns the value of a parameter, `None` if absent or valueless
pub fn param_value<'a>(params: &'a [Param], name: &str) -> Option<&'a str> {
    find_param(params, name).and_then(|p| p.value.as_deref())
}

/// Replaces an existing parameter with the same name or appends a new one
pub fn set_param(params: &mut Vec<Param>, param: Param) {
    match params.iter_mut().find(|p| p.is(&param.name)) {
        Some(existing) => *existing = param,
        None => params.push(param),
    }
}

/// Removes every parameter with the given name
pub fn remove_param(params: &mut Vec<Param>, name: &str) {
    params.retain(|p| !p.is(name));
}
