//! Function-call facade: builds and dispatches `RETURN <path>(<args>);`.
//!
//! Known namespaces (math, time, string, ...) lower to `<ns>::<func>`;
//! anything else is treated as a user-defined function and prefixed with
//! `fn::`. Typed helper namespaces expose documented signatures that produce
//! the same calls as the dynamic path builder.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use surrealix_proto::{from_value, Value};

use crate::connection::Surreal;
use crate::error::{Error, Result};

/// Built-in server function namespaces. A path starting with any other
/// segment resolves as a user-defined function.
pub const BUILTIN_NAMESPACES: &[&str] = &[
    "array", "bytes", "count", "crypto", "duration", "encoding", "geo", "http", "math", "meta", "object", "parse",
    "rand", "record", "search", "session", "sleep", "string", "time", "type", "value", "vector",
];

/// A fully resolved function call, ready to dispatch.
pub struct FunctionCall<'a> {
    conn: &'a dyn Surreal,
    path: String,
    args: Vec<Value>,
}

impl<'a> FunctionCall<'a> {
    pub fn new(conn: &'a dyn Surreal, path: impl Into<String>, args: Vec<Value>) -> Self {
        Self { conn, path: path.into(), args }
    }

    pub fn path(&self) -> &str { &self.path }

    /// The parameterized statement: each positional argument binds as
    /// `$fn_arg_<i>`.
    pub fn to_sql(&self) -> (String, BTreeMap<String, Value>) {
        let mut params = BTreeMap::new();
        let mut placeholders = Vec::with_capacity(self.args.len());
        for (i, arg) in self.args.iter().enumerate() {
            let name = format!("fn_arg_{i}");
            placeholders.push(format!("${name}"));
            params.insert(name, arg.clone());
        }
        (format!("RETURN {}({});", self.path, placeholders.join(", ")), params)
    }

    pub async fn execute(self) -> Result<Value> {
        let (sql, params) = self.to_sql();
        let response = self.conn.query(&sql, params).await?;
        Ok(response.first_result().map(|r| r.result.clone()).unwrap_or(Value::None))
    }

    pub async fn execute_as<T: DeserializeOwned>(self) -> Result<T> {
        let value = self.execute().await?;
        Ok(from_value(&value)?)
    }
}

impl std::fmt::Debug for FunctionCall<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FunctionCall({}/{} args)", self.path, self.args.len())
    }
}

/// Dotted-path builder: accumulate namespace segments, then `call`.
///
/// ```ignore
/// conn.fn_().ns("math").ns("sqrt").call(vec![Value::Int(16)])?.execute().await?;
/// conn.fn_().ns("cast_vote").call(args)?; // -> fn::cast_vote(...)
/// ```
pub struct FunctionNamespace<'a> {
    conn: &'a dyn Surreal,
    path: Vec<String>,
}

impl<'a> FunctionNamespace<'a> {
    pub fn new(conn: &'a dyn Surreal) -> Self { Self { conn, path: Vec::new() } }

    /// Append a path segment (namespace or terminal function name).
    pub fn ns(mut self, segment: impl Into<String>) -> Self {
        self.path.push(segment.into());
        self
    }

    /// Resolve the accumulated path and bind arguments.
    pub fn call(self, args: Vec<Value>) -> Result<FunctionCall<'a>> {
        let first = self
            .path
            .first()
            .ok_or_else(|| Error::Validation("cannot call the root function namespace".to_owned()))?;
        let path = if BUILTIN_NAMESPACES.contains(&first.as_str()) {
            self.path.join("::")
        } else {
            format!("fn::{}", self.path.join("::"))
        };
        Ok(FunctionCall::new(self.conn, path, args))
    }

    pub fn math(&self) -> MathFunctions<'a> { MathFunctions { conn: self.conn } }

    pub fn time(&self) -> TimeFunctions<'a> { TimeFunctions { conn: self.conn } }

    pub fn string(&self) -> StringFunctions<'a> { StringFunctions { conn: self.conn } }

    pub fn array(&self) -> ArrayFunctions<'a> { ArrayFunctions { conn: self.conn } }

    pub fn crypto(&self) -> CryptoFunctions<'a> { CryptoFunctions { conn: self.conn } }
}

/// Typed `math::` helpers.
pub struct MathFunctions<'a> {
    conn: &'a dyn Surreal,
}

impl<'a> MathFunctions<'a> {
    fn call(&self, func: &str, args: Vec<Value>) -> FunctionCall<'a> {
        FunctionCall::new(self.conn, format!("math::{func}"), args)
    }

    /// `math::abs(number)`
    pub fn abs(&self, value: impl Into<Value>) -> FunctionCall<'a> { self.call("abs", vec![value.into()]) }

    /// `math::ceil(number)`
    pub fn ceil(&self, value: impl Into<Value>) -> FunctionCall<'a> { self.call("ceil", vec![value.into()]) }

    /// `math::floor(number)`
    pub fn floor(&self, value: impl Into<Value>) -> FunctionCall<'a> { self.call("floor", vec![value.into()]) }

    /// `math::round(number)`
    pub fn round(&self, value: impl Into<Value>) -> FunctionCall<'a> { self.call("round", vec![value.into()]) }

    /// `math::sqrt(number)`
    pub fn sqrt(&self, value: impl Into<Value>) -> FunctionCall<'a> { self.call("sqrt", vec![value.into()]) }

    /// `math::pow(base, exponent)`
    pub fn pow(&self, base: impl Into<Value>, exponent: impl Into<Value>) -> FunctionCall<'a> {
        self.call("pow", vec![base.into(), exponent.into()])
    }

    /// `math::max(array)`
    pub fn max(&self, values: Vec<Value>) -> FunctionCall<'a> { self.call("max", vec![Value::Array(values)]) }

    /// `math::min(array)`
    pub fn min(&self, values: Vec<Value>) -> FunctionCall<'a> { self.call("min", vec![Value::Array(values)]) }

    /// `math::mean(array)`
    pub fn mean(&self, values: Vec<Value>) -> FunctionCall<'a> { self.call("mean", vec![Value::Array(values)]) }

    /// `math::sum(array)`
    pub fn sum(&self, values: Vec<Value>) -> FunctionCall<'a> { self.call("sum", vec![Value::Array(values)]) }

    /// `math::fixed(number, places)`
    pub fn fixed(&self, value: impl Into<Value>, places: i64) -> FunctionCall<'a> {
        self.call("fixed", vec![value.into(), Value::Int(places)])
    }
}

/// Typed `time::` helpers.
pub struct TimeFunctions<'a> {
    conn: &'a dyn Surreal,
}

impl<'a> TimeFunctions<'a> {
    fn call(&self, func: &str, args: Vec<Value>) -> FunctionCall<'a> {
        FunctionCall::new(self.conn, format!("time::{func}"), args)
    }

    /// `time::now()`
    pub fn now(&self) -> FunctionCall<'a> { self.call("now", vec![]) }

    /// `time::unix(datetime)`
    pub fn unix(&self, datetime: impl Into<Value>) -> FunctionCall<'a> { self.call("unix", vec![datetime.into()]) }

    /// `time::floor(datetime, duration)`
    pub fn floor(&self, datetime: impl Into<Value>, duration: impl Into<Value>) -> FunctionCall<'a> {
        self.call("floor", vec![datetime.into(), duration.into()])
    }

    /// `time::round(datetime, duration)`
    pub fn round(&self, datetime: impl Into<Value>, duration: impl Into<Value>) -> FunctionCall<'a> {
        self.call("round", vec![datetime.into(), duration.into()])
    }

    /// `time::format(datetime, format)`
    pub fn format(&self, datetime: impl Into<Value>, format: &str) -> FunctionCall<'a> {
        self.call("format", vec![datetime.into(), Value::Strand(format.to_owned())])
    }
}

/// Typed `string::` helpers.
pub struct StringFunctions<'a> {
    conn: &'a dyn Surreal,
}

impl<'a> StringFunctions<'a> {
    fn call(&self, func: &str, args: Vec<Value>) -> FunctionCall<'a> {
        FunctionCall::new(self.conn, format!("string::{func}"), args)
    }

    /// `string::lowercase(string)`
    pub fn lowercase(&self, value: impl Into<Value>) -> FunctionCall<'a> { self.call("lowercase", vec![value.into()]) }

    /// `string::uppercase(string)`
    pub fn uppercase(&self, value: impl Into<Value>) -> FunctionCall<'a> { self.call("uppercase", vec![value.into()]) }

    /// `string::trim(string)`
    pub fn trim(&self, value: impl Into<Value>) -> FunctionCall<'a> { self.call("trim", vec![value.into()]) }

    /// `string::len(string)`
    pub fn len(&self, value: impl Into<Value>) -> FunctionCall<'a> { self.call("len", vec![value.into()]) }

    /// `string::slug(string)`
    pub fn slug(&self, value: impl Into<Value>) -> FunctionCall<'a> { self.call("slug", vec![value.into()]) }

    /// `string::contains(string, substring)`
    pub fn contains(&self, value: impl Into<Value>, substring: impl Into<Value>) -> FunctionCall<'a> {
        self.call("contains", vec![value.into(), substring.into()])
    }

    /// `string::split(string, separator)`
    pub fn split(&self, value: impl Into<Value>, separator: impl Into<Value>) -> FunctionCall<'a> {
        self.call("split", vec![value.into(), separator.into()])
    }

    /// `string::replace(string, search, replacement)`
    pub fn replace(
        &self,
        value: impl Into<Value>,
        search: impl Into<Value>,
        replacement: impl Into<Value>,
    ) -> FunctionCall<'a> {
        self.call("replace", vec![value.into(), search.into(), replacement.into()])
    }
}

/// Typed `array::` helpers.
pub struct ArrayFunctions<'a> {
    conn: &'a dyn Surreal,
}

impl<'a> ArrayFunctions<'a> {
    fn call(&self, func: &str, args: Vec<Value>) -> FunctionCall<'a> {
        FunctionCall::new(self.conn, format!("array::{func}"), args)
    }

    /// `array::len(array)`
    pub fn len(&self, values: Vec<Value>) -> FunctionCall<'a> { self.call("len", vec![Value::Array(values)]) }

    /// `array::distinct(array)`
    pub fn distinct(&self, values: Vec<Value>) -> FunctionCall<'a> { self.call("distinct", vec![Value::Array(values)]) }

    /// `array::sort(array)`
    pub fn sort(&self, values: Vec<Value>) -> FunctionCall<'a> { self.call("sort", vec![Value::Array(values)]) }

    /// `array::flatten(array)`
    pub fn flatten(&self, values: Vec<Value>) -> FunctionCall<'a> { self.call("flatten", vec![Value::Array(values)]) }

    /// `array::union(left, right)`
    pub fn union(&self, left: Vec<Value>, right: Vec<Value>) -> FunctionCall<'a> {
        self.call("union", vec![Value::Array(left), Value::Array(right)])
    }
}

/// Typed `crypto::` helpers.
pub struct CryptoFunctions<'a> {
    conn: &'a dyn Surreal,
}

impl<'a> CryptoFunctions<'a> {
    fn call(&self, func: &str, args: Vec<Value>) -> FunctionCall<'a> {
        FunctionCall::new(self.conn, format!("crypto::{func}"), args)
    }

    /// `crypto::md5(string)`
    pub fn md5(&self, value: impl Into<Value>) -> FunctionCall<'a> { self.call("md5", vec![value.into()]) }

    /// `crypto::sha1(string)`
    pub fn sha1(&self, value: impl Into<Value>) -> FunctionCall<'a> { self.call("sha1", vec![value.into()]) }

    /// `crypto::sha256(string)`
    pub fn sha256(&self, value: impl Into<Value>) -> FunctionCall<'a> { self.call("sha256", vec![value.into()]) }

    /// `crypto::sha512(string)`
    pub fn sha512(&self, value: impl Into<Value>) -> FunctionCall<'a> { self.call("sha512", vec![value.into()]) }
}
