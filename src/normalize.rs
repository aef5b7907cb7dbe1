//! Cosmetic cleanup run at the end of every pass.
//!
//! Outside quoted literals: whitespace runs collapse to one space, repeated
//! `;` collapse to one (except inside parentheses, so `for(;;)` survives),
//! and the `<?php` open tag is followed by exactly one newline. A buffer that
//! is only whitespace becomes empty. Quoted literals are copied verbatim.
//!
//! Quote tracking is lexical only; an apostrophe inside a comment starts a
//! "literal" that shields the text after it from cleanup.

const OPEN_TAG: &str = "<?php";

fn skip_whitespace(source: &str, mut i: usize) -> usize {
    while let Some(c) = source[i..].chars().next() {
        if !c.is_whitespace() {
            break;
        }
        i += c.len_utf8();
    }
    i
}

pub fn normalize(source: &str) -> String {
    let mut output = String::with_capacity(source.len());
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let mut i = 0;

    while let Some(c) = source[i..].chars().next() {
        let next = i + c.len_utf8();

        if let Some(delimiter) = quote {
            output.push(c);
            i = next;
            if c == '\\' {
                if let Some(escaped) = source[i..].chars().next() {
                    output.push(escaped);
                    i += escaped.len_utf8();
                }
            } else if c == delimiter {
                quote = None;
            }
            continue;
        }

        if source[i..].starts_with(OPEN_TAG) {
            let after = i + OPEN_TAG.len();
            if source[after..].starts_with(char::is_whitespace) {
                output.push_str(OPEN_TAG);
                output.push('\n');
                i = skip_whitespace(source, after);
                continue;
            }
        }

        match c {
            c if c.is_whitespace() => {
                output.push(' ');
                i = skip_whitespace(source, i);
            }
            ';' => {
                output.push(';');
                i = next;
                if depth == 0 {
                    loop {
                        let j = skip_whitespace(source, i);
                        if !source[j..].starts_with(';') {
                            break;
                        }
                        i = j + 1;
                    }
                }
            }
            _ => {
                match c {
                    '\'' | '"' => quote = Some(c),
                    '(' => depth += 1,
                    ')' => depth = depth.saturating_sub(1),
                    _ => {}
                }
                output.push(c);
                i = next;
            }
        }
    }

    if output.trim().is_empty() {
        output.clear();
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        fn check(input: &str, expected: &str) {
            assert_eq!(normalize(input), expected, "Normalizing {input:?}");
        }

        check("$x = 'hello';", "$x = 'hello';");
        check("$a  =\n\t1;\n\n$b = 2;", "$a = 1; $b = 2;");
        check("a();;; b(); ;c();", "a(); b();c();");
        check("for (;;) { x(); }", "for (;;) { x(); }");
        check("<?php   \n\n echo 1;", "<?php\necho 1;");
        check("<?php\necho 1;", "<?php\necho 1;");
        check("echo '<?php  x';", "echo '<?php  x';");
        check("echo 'a  b\n c;;';  ", "echo 'a  b\n c;;'; ");
        check(r#"echo "q\"  x";   $y;"#, r#"echo "q\"  x"; $y;"#);
        check(" \n\t ", "");
        check("", "");
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "<?php\n\n$a = 'x  y';;\n\n echo $a ;",
            "  ;; ",
            "for ( ; ; ) {}",
        ];
        for input in inputs {
            let once = normalize(input);
            assert_eq!(normalize(&once), once, "Normalizing {input:?} twice");
        }
    }
}
