//! Query-string parsing for `/query`.

use std::collections::HashMap;

use backscan_query::QueryParams;

use crate::error::ParamError;

const FILE_NAME: &str = "filename";
const EVENTS: &str = "events";
const INCLUDE_FILTER: &str = "includefilter";

/// Parses and validates the raw query string of a `/query` request.
pub fn parse_query_params(raw: Option<&str>) -> Result<QueryParams, ParamError> {
    let mut values: HashMap<String, Vec<String>> = HashMap::new();
    for (key, value) in url::form_urlencoded::parse(raw.unwrap_or_default().as_bytes()) {
        values
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }

    let file_name = single(&mut values, FILE_NAME)?.ok_or(ParamError::MissingFileName)?;
    if file_name.is_empty() {
        return Err(ParamError::EmptyFileName);
    }

    let last_n_events = match single(&mut values, EVENTS)? {
        None => 0,
        Some(raw) => {
            let parsed: i64 = raw
                .trim()
                .parse()
                .map_err(|_| ParamError::InvalidEvents(raw.clone()))?;
            u64::try_from(parsed).map_err(|_| ParamError::NegativeEvents(parsed))?
        }
    };

    let include_filter = single(&mut values, INCLUDE_FILTER)?;

    Ok(QueryParams {
        file_name,
        last_n_events,
        include_filter,
    })
}

fn single(
    values: &mut HashMap<String, Vec<String>>,
    key: &'static str,
) -> Result<Option<String>, ParamError> {
    match values.remove(key) {
        None => Ok(None),
        Some(mut list) if list.len() == 1 => Ok(list.pop()),
        Some(_) => Err(ParamError::Repeated(key)),
    }
}
