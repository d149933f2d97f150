//! Command-line options for spawned backends.

/// Build the `options` startup parameter of a backend: the client's own
/// command-line options followed by a `-c name=value` for every startup
/// option. `application_name` is skipped since backends report their own.
pub fn backend_options(cmdline: Option<&str>, options: &[(String, String)]) -> String {
    let mut result = cmdline.unwrap_or_default().to_string();

    for (name, value) in options {
        if name == "application_name" {
            continue;
        }
        result.push_str(" -c ");
        result.push_str(name);
        result.push('=');
        escape(&mut result, value);
    }

    result
}

/// Spaces separate options, so they're escaped inside values.
fn escape(dst: &mut String, value: &str) {
    for c in value.chars() {
        if c == ' ' || c == '\\' {
            dst.push('\\');
        }
        dst.push(c);
    }
}
