use std::collections::HashMap;

/// `SANITIZED_SERVICE_NAME`: replace any char outside `[A-Za-z0-9]` with `_`
/// and upper-case the result (§4.3.3 step 4).
pub fn sanitized_service_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .to_uppercase()
}

/// Interpolate `$PORT`, `${PORT}`, and `${PORT:otherServiceName}` tokens in
/// an env value. `$PORT`/`${PORT}` resolve to `own_port`; `${PORT:name}`
/// resolves to `port_map[name]`. Tokens naming an unknown sibling are left
/// literal.
pub fn interpolate_port_tokens(value: &str, own_port: u16, port_map: &HashMap<String, u16>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix("${PORT:") {
            if let Some(end) = tail.find('}') {
                let name = &tail[..end];
                match port_map.get(name) {
                    Some(port) => out.push_str(&port.to_string()),
                    None => {
                        out.push_str("${PORT:");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &tail[end + 1..];
                continue;
            }
        }
        if let Some(tail) = rest.strip_prefix("${PORT}") {
            out.push_str(&own_port.to_string());
            rest = tail;
            continue;
        }
        if let Some(tail) = rest.strip_prefix("$PORT") {
            out.push_str(&own_port.to_string());
            rest = tail;
            continue;
        }
        let mut chars = rest.chars();
        let c = chars.next().expect("rest is non-empty");
        out.push(c);
        rest = chars.as_str();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_and_uppercases() {
        assert_eq!(sanitized_service_name("web"), "WEB");
        assert_eq!(sanitized_service_name("my-service.v2"), "MY_SERVICE_V2");
    }

    #[test]
    fn interpolates_bare_and_braced_own_port() {
        let map = HashMap::new();
        assert_eq!(interpolate_port_tokens("$PORT", 3000, &map), "3000");
        assert_eq!(interpolate_port_tokens("${PORT}", 3000, &map), "3000");
        assert_eq!(
            interpolate_port_tokens("http://localhost:$PORT/api", 3000, &map),
            "http://localhost:3000/api"
        );
    }

    #[test]
    fn interpolates_named_sibling_port() {
        let mut map = HashMap::new();
        map.insert("web".to_string(), 4000);
        assert_eq!(
            interpolate_port_tokens("${PORT:web}", 3000, &map),
            "4000"
        );
    }

    #[test]
    fn unknown_sibling_is_left_literal() {
        let map = HashMap::new();
        assert_eq!(
            interpolate_port_tokens("${PORT:unknown}", 3000, &map),
            "${PORT:unknown}"
        );
    }

    #[test]
    fn non_port_dollar_signs_pass_through() {
        let map = HashMap::new();
        assert_eq!(interpolate_port_tokens("$HOME/bin", 3000, &map), "$HOME/bin");
    }
}
