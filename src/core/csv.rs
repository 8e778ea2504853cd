//! Single-record CSV grammar used by slice and set flags.

/// Split one CSV record into fields.
///
/// Fields are separated by commas; a field wrapped in double quotes may contain
/// commas, and `""` inside it is a literal quote. Empty input yields no fields.
pub(crate) fn parse_record(input: &str) -> Result<Vec<String>, String> {
    if input.is_empty() {
        return Ok(Vec::new());
    }
    if input.contains(['\n', '\r']) {
        return Err("expected a single record, found a line break".to_string());
    }

    let mut fields = Vec::new();
    let mut chars = input.chars().peekable();
    loop {
        let mut field = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') if chars.peek() == Some(&'"') => {
                        chars.next();
                        field.push('"');
                    }
                    Some('"') => break,
                    Some(c) => field.push(c),
                    None => return Err("unterminated quoted field".to_string()),
                }
            }
            match chars.next() {
                None => {
                    fields.push(field);
                    return Ok(fields);
                }
                Some(',') => fields.push(field),
                Some(c) => return Err(format!("unexpected {:?} after quoted field", c)),
            }
        } else {
            loop {
                match chars.next() {
                    None => {
                        fields.push(field);
                        return Ok(fields);
                    }
                    Some(',') => break,
                    Some('"') => return Err("bare quote in unquoted field".to_string()),
                    Some(c) => field.push(c),
                }
            }
            fields.push(field);
        }
    }
}

/// Render fields as one CSV record that `parse_record` reads back unchanged.
pub(crate) fn format_record<'a>(fields: impl IntoIterator<Item = &'a str>) -> String {
    let fields: Vec<&str> = fields.into_iter().collect();
    // A lone empty field must be quoted, otherwise it reads back as no fields.
    if let [only] = fields.as_slice() {
        if only.is_empty() {
            return "\"\"".to_string();
        }
    }
    fields
        .iter()
        .map(|field| {
            if field.contains([',', '"']) {
                format!("\"{}\"", field.replace('"', "\"\""))
            } else {
                (*field).to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
