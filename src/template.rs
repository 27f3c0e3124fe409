//! `${name}` placeholder substitution.
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::{error::PoolExhausted, variable::Resolver};

// No `$`, `{` or `}` inside the braces, so placeholders never nest and
// `${a ${b}` only substitutes `${b}`.
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^${}]+)\}").expect("placeholder pattern is valid"));

/// Replaces every `${name}` in `template`, left to right, with the value the
/// resolver hands out for `name`.
///
/// A `$` that is not followed by a braced name is kept verbatim.
pub fn substitute(template: &str, resolver: &mut Resolver<'_>) -> Result<String, PoolExhausted> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&template[last..whole.start()]);
        out.push_str(&resolver.resolve(name.as_str())?);
        last = whole.end();
    }

    out.push_str(&template[last..]);
    Ok(out)
}

/// Substitutes the string-valued fields of a flat object.
///
/// Only the top level is visited: nested objects, arrays and non-string
/// scalars are copied as they are.
pub fn substitute_fields(
    fields: &Map<String, Value>,
    resolver: &mut Resolver<'_>,
) -> Result<Map<String, Value>, PoolExhausted> {
    fields
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => Value::String(substitute(s, resolver)?),
                other => other.clone(),
            };
            Ok((key.clone(), value))
        })
        .collect()
}
