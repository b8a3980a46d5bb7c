//! Named query arguments.

use polysql_core::Value;

/// Values for the `:name` placeholders of a query.
///
/// Names are stored with their leading colon; [`bind`](Args::bind) adds it
/// when missing.
///
/// # Examples
///
/// ```
/// use polysql_core::Value;
/// use polysql_db::Args;
///
/// let args = Args::new().bind("name", "alice").bind(":uid", 7);
/// assert_eq!(args.get(":name"), Some(&Value::from("alice")));
/// assert_eq!(args.get("uid"), Some(&Value::Integer(7)));
///
/// let same: Args = [(":uid", 7)].into();
/// assert_eq!(same.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    values: Vec<(String, Value)>,
}

fn placeholder(name: &str) -> String {
    if name.starts_with(':') {
        name.to_string()
    } else {
        format!(":{name}")
    }
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a value.
    pub fn bind(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        let name = placeholder(name);
        let value = value.into();
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        let name = placeholder(name);
        self.values.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn to_vec(&self) -> Vec<(String, Value)> {
        self.values.clone()
    }
}

impl From<()> for Args {
    fn from(_: ()) -> Self {
        Args::new()
    }
}

impl From<&Args> for Args {
    fn from(args: &Args) -> Self {
        args.clone()
    }
}

impl<V: Into<Value>, const N: usize> From<[(&str, V); N]> for Args {
    fn from(pairs: [(&str, V); N]) -> Self {
        pairs
            .into_iter()
            .fold(Args::new(), |args, (name, value)| args.bind(name, value))
    }
}

impl<V: Into<Value>> From<Vec<(&str, V)>> for Args {
    fn from(pairs: Vec<(&str, V)>) -> Self {
        pairs
            .into_iter()
            .fold(Args::new(), |args, (name, value)| args.bind(name, value))
    }
}
