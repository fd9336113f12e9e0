use crate::capture::Header;

/// Parses line-delimited `Name: Value` text. Lines without a colon or with
/// an empty name are skipped; the value keeps any further colons.
pub fn parse_header_text(text: &str) -> Vec<Header> {
    text.lines()
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some(Header::new(name, value.trim()))
        })
        .collect()
}

/// Applies `overrides` on top of `base`. Names compare case-insensitively;
/// an overridden header keeps its original position, new ones are appended.
pub fn merge_headers(base: &[Header], overrides: &[Header]) -> Vec<Header> {
    let mut merged: Vec<Header> = base.to_vec();
    for o in overrides {
        match merged
            .iter_mut()
            .find(|h| h.name.eq_ignore_ascii_case(&o.name))
        {
            Some(existing) => existing.value = o.value.clone(),
            None => merged.push(o.clone()),
        }
    }
    merged
}

pub fn strip_headers(headers: Vec<Header>, names: &[&str]) -> Vec<Header> {
    headers
        .into_iter()
        .filter(|h| !names.iter().any(|n| h.name.eq_ignore_ascii_case(n)))
        .collect()
}
