//! Runtime-validated printf-style formatting
//!
//! Templates that are only known at runtime (loaded from configuration, for
//! example) cannot go through `format_args!`. [`render`] checks every
//! conversion specifier against the kind of the argument it consumes before
//! producing any output, so a template that does not fit its arguments is
//! rejected instead of misinterpreting them.

use crate::error::FileError;

/// A single formatting argument
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FormatArg<'a> {
    /// Signed integer, for `%d` and `%i`
    Int(i64),
    /// Unsigned integer, for `%u`, `%x`, `%X` and `%o`
    UInt(u64),
    /// Floating point, for `%f`, `%F`, `%e`, `%E`, `%g` and `%G`
    Float(f64),
    /// String, for `%s`
    Str(&'a str),
    /// Character, for `%c`
    Char(char),
}

#[derive(Debug, Default, Clone, Copy)]
struct Spec {
    left: bool,
    plus: bool,
    space: bool,
    zero: bool,
    alt: bool,
    width: Option<usize>,
    precision: Option<usize>,
    conversion: char,
}

#[derive(Debug)]
enum Segment<'t> {
    Literal(&'t str),
    Percent,
    Conversion(Spec),
}

/// Render `template` with `args`.
///
/// Fails with [`FileError::Failure`] if a specifier is malformed or unknown,
/// uses `*` or `%n`, does not match its argument's kind, or if the number of
/// arguments differs from the number of specifiers.
pub fn render(template: &str, args: &[FormatArg<'_>]) -> Result<String, FileError> {
    let segments = parse(template)?;
    validate(&segments, args)?;

    let mut out = String::with_capacity(template.len());
    let mut next = args.iter();
    for segment in &segments {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Percent => out.push('%'),
            Segment::Conversion(spec) => {
                // validate() guarantees an argument exists for every conversion
                let arg = next.next().ok_or(FileError::Failure)?;
                out.push_str(&convert(spec, arg));
            }
        }
    }
    Ok(out)
}

fn parse(template: &str) -> Result<Vec<Segment<'_>>, FileError> {
    let mut segments = Vec::new();
    let mut rest = template;

    while let Some(pos) = rest.find('%') {
        if pos > 0 {
            segments.push(Segment::Literal(&rest[..pos]));
        }
        let (segment, consumed) = parse_spec(&rest[pos + 1..])?;
        segments.push(segment);
        rest = &rest[pos + 1 + consumed..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }
    Ok(segments)
}

/// Parse the text after a `%`; returns the segment and bytes consumed
fn parse_spec(text: &str) -> Result<(Segment<'static>, usize), FileError> {
    let bytes = text.as_bytes();
    let mut i = 0;

    if bytes.first() == Some(&b'%') {
        return Ok((Segment::Percent, 1));
    }

    let mut spec = Spec::default();
    while let Some(&b) = bytes.get(i) {
        match b {
            b'-' => spec.left = true,
            b'+' => spec.plus = true,
            b' ' => spec.space = true,
            b'0' => spec.zero = true,
            b'#' => spec.alt = true,
            _ => break,
        }
        i += 1;
    }

    let (width, used) = parse_number(&bytes[i..])?;
    spec.width = width;
    i += used;

    if bytes.get(i) == Some(&b'.') {
        i += 1;
        let (precision, used) = parse_number(&bytes[i..])?;
        spec.precision = Some(precision.unwrap_or(0));
        i += used;
    }

    // Length modifiers carry no meaning for typed arguments
    while let Some(b'h' | b'l' | b'z') = bytes.get(i) {
        i += 1;
    }

    match bytes.get(i) {
        Some(&c) if b"diuxXofFeEgGsc".contains(&c) => {
            spec.conversion = c as char;
            Ok((Segment::Conversion(spec), i + 1))
        }
        _ => Err(FileError::Failure),
    }
}

fn parse_number(bytes: &[u8]) -> Result<(Option<usize>, usize), FileError> {
    if bytes.first() == Some(&b'*') {
        return Err(FileError::Failure);
    }
    let digits = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return Ok((None, 0));
    }
    let value = std::str::from_utf8(&bytes[..digits])
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|v| *v <= 4096)
        .ok_or(FileError::Failure)?;
    Ok((Some(value), digits))
}

fn validate(segments: &[Segment<'_>], args: &[FormatArg<'_>]) -> Result<(), FileError> {
    let mut args = args.iter();
    for segment in segments {
        let Segment::Conversion(spec) = segment else {
            continue;
        };
        let arg = args.next().ok_or(FileError::Failure)?;
        let fits = matches!(
            (spec.conversion, arg),
            ('d' | 'i', FormatArg::Int(_))
                | ('u' | 'x' | 'X' | 'o', FormatArg::UInt(_))
                | ('f' | 'F' | 'e' | 'E' | 'g' | 'G', FormatArg::Float(_))
                | ('s', FormatArg::Str(_))
                | ('c', FormatArg::Char(_))
        );
        if !fits {
            return Err(FileError::Failure);
        }
    }
    if args.next().is_some() {
        return Err(FileError::Failure);
    }
    Ok(())
}

fn convert(spec: &Spec, arg: &FormatArg<'_>) -> String {
    match *arg {
        FormatArg::Int(v) => {
            let digits = min_digits(v.unsigned_abs().to_string(), spec.precision);
            pad_numeric(spec, sign(spec, v < 0), "", digits)
        }
        FormatArg::UInt(v) => {
            let (digits, prefix) = match spec.conversion {
                'x' => (format!("{v:x}"), if spec.alt && v != 0 { "0x" } else { "" }),
                'X' => (format!("{v:X}"), if spec.alt && v != 0 { "0X" } else { "" }),
                'o' => {
                    let octal = format!("{v:o}");
                    let octal = if spec.alt && !octal.starts_with('0') {
                        format!("0{octal}")
                    } else {
                        octal
                    };
                    (octal, "")
                }
                _ => (v.to_string(), ""),
            };
            pad_numeric(spec, "", prefix, min_digits(digits, spec.precision))
        }
        FormatArg::Float(v) => {
            let upper = spec.conversion.is_ascii_uppercase();
            if !v.is_finite() {
                let text = if v.is_nan() { "nan" } else { "inf" };
                let text = if upper { text.to_uppercase() } else { text.to_string() };
                let spaces_only = Spec {
                    zero: false,
                    ..*spec
                };
                let negative = v.is_sign_negative() && !v.is_nan();
                return pad_numeric(&spaces_only, sign(spec, negative), "", text);
            }
            let precision = spec.precision.unwrap_or(6);
            let body = match spec.conversion.to_ascii_lowercase() {
                'f' => format!("{:.*}", precision, v.abs()),
                'e' => exponent_form(v.abs(), precision, upper),
                _ => general_form(v.abs(), precision, spec.alt, upper),
            };
            pad_numeric(spec, sign(spec, v.is_sign_negative() && v != 0.0), "", body)
        }
        FormatArg::Str(s) => {
            let text: String = match spec.precision {
                Some(p) => s.chars().take(p).collect(),
                None => s.to_string(),
            };
            pad_text(spec, text)
        }
        FormatArg::Char(c) => pad_text(spec, c.to_string()),
    }
}

fn sign(spec: &Spec, negative: bool) -> &'static str {
    if negative {
        "-"
    } else if spec.plus {
        "+"
    } else if spec.space {
        " "
    } else {
        ""
    }
}

fn min_digits(digits: String, precision: Option<usize>) -> String {
    match precision {
        Some(p) if digits.len() < p => format!("{}{}", "0".repeat(p - digits.len()), digits),
        _ => digits,
    }
}

/// `d.ddde+XX` with at least two exponent digits
fn exponent_form(v: f64, precision: usize, upper: bool) -> String {
    let raw = format!("{:.*e}", precision, v);
    let (mantissa, exponent) = raw.split_once('e').unwrap_or((raw.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let e = if upper { 'E' } else { 'e' };
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{mantissa}{e}{sign}{:02}", exponent.unsigned_abs())
}

fn general_form(v: f64, precision: usize, alt: bool, upper: bool) -> String {
    let p = precision.max(1);
    let exponent = if v == 0.0 {
        0
    } else {
        let raw = format!("{:.*e}", p - 1, v);
        raw.split_once('e')
            .and_then(|(_, e)| e.parse::<i64>().ok())
            .unwrap_or(0)
    };

    let text = if exponent < -4 || exponent >= p as i64 {
        exponent_form(v, p - 1, upper)
    } else {
        let decimals = (p as i64 - 1 - exponent).max(0) as usize;
        format!("{:.*}", decimals, v)
    };

    if alt {
        return text;
    }
    match text.find(['e', 'E']) {
        Some(pos) => {
            let (mantissa, exp) = text.split_at(pos);
            format!("{}{}", strip_fraction_zeros(mantissa), exp)
        }
        None => strip_fraction_zeros(&text).to_string(),
    }
}

fn strip_fraction_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

fn pad_numeric(spec: &Spec, sign: &str, prefix: &str, body: String) -> String {
    let len = sign.len() + prefix.len() + body.len();
    let width = spec.width.unwrap_or(0);
    if len >= width {
        return format!("{sign}{prefix}{body}");
    }
    let fill = width - len;
    if spec.left {
        format!("{sign}{prefix}{body}{}", " ".repeat(fill))
    } else if spec.zero && (spec.precision.is_none() || is_float(spec.conversion)) {
        format!("{sign}{prefix}{}{body}", "0".repeat(fill))
    } else {
        format!("{}{sign}{prefix}{body}", " ".repeat(fill))
    }
}

fn is_float(conversion: char) -> bool {
    matches!(conversion, 'f' | 'F' | 'e' | 'E' | 'g' | 'G')
}

fn pad_text(spec: &Spec, text: String) -> String {
    let len = text.chars().count();
    let width = spec.width.unwrap_or(0);
    if len >= width {
        return text;
    }
    let fill = " ".repeat(width - len);
    if spec.left {
        text + &fill
    } else {
        fill + &text
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use FormatArg::*;

    #[test]
    fn renders_common_conversions() {
        let out = render(
            "%s: %d items, %u bytes, 0x%04x, %c",
            &[Str("log"), Int(-3), UInt(512), UInt(0xab), Char('!')],
        )
        .unwrap();
        assert_eq!(out, "log: -3 items, 512 bytes, 0x00ab, !");
    }

    #[test]
    fn renders_width_and_flags() {
        assert_eq!(render("[%5d]", &[Int(42)]).unwrap(), "[   42]");
        assert_eq!(render("[%-5d]", &[Int(42)]).unwrap(), "[42   ]");
        assert_eq!(render("[%05d]", &[Int(-42)]).unwrap(), "[-0042]");
        assert_eq!(render("[%+d]", &[Int(7)]).unwrap(), "[+7]");
        assert_eq!(render("[%#x]", &[UInt(255)]).unwrap(), "[0xff]");
        assert_eq!(render("[%#o]", &[UInt(8)]).unwrap(), "[010]");
        assert_eq!(render("[%.3s]", &[Str("abcdef")]).unwrap(), "[abc]");
        assert_eq!(render("100%%", &[]).unwrap(), "100%");
    }

    #[test]
    fn renders_floats() {
        assert_eq!(render("%.2f", &[Float(1.23456)]).unwrap(), "1.23");
        assert_eq!(render("%f", &[Float(1.5)]).unwrap(), "1.500000");
        assert_eq!(render("%e", &[Float(150.0)]).unwrap(), "1.500000e+02");
        assert_eq!(render("%.1E", &[Float(0.00012)]).unwrap(), "1.2E-04");
        assert_eq!(render("%g", &[Float(0.0001)]).unwrap(), "0.0001");
        assert_eq!(render("%g", &[Float(1234567.0)]).unwrap(), "1.23457e+06");
        assert_eq!(render("%g", &[Float(100.0)]).unwrap(), "100");
    }

    #[test]
    fn rejects_kind_mismatch() {
        assert_eq!(render("%d", &[Str("x")]), Err(FileError::Failure));
        assert_eq!(render("%s", &[Int(1)]), Err(FileError::Failure));
        assert_eq!(render("%x", &[Int(1)]), Err(FileError::Failure));
    }

    #[test]
    fn rejects_argument_count_mismatch() {
        assert_eq!(render("%d %d", &[Int(1)]), Err(FileError::Failure));
        assert_eq!(render("%d", &[Int(1), Int(2)]), Err(FileError::Failure));
        assert_eq!(render("plain", &[Int(1)]), Err(FileError::Failure));
    }

    #[test]
    fn rejects_dangerous_or_unknown_specifiers() {
        assert_eq!(render("%n", &[Int(1)]), Err(FileError::Failure));
        assert_eq!(render("%*d", &[Int(1), Int(2)]), Err(FileError::Failure));
        assert_eq!(render("%q", &[]), Err(FileError::Failure));
        assert_eq!(render("trailing %", &[]), Err(FileError::Failure));
    }

    #[test]
    fn length_modifiers_are_accepted() {
        assert_eq!(render("%lld/%zu", &[Int(5), UInt(6)]).unwrap(), "5/6");
    }
}
