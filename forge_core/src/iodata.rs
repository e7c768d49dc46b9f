//! Line format for modules, PGized format for the IO directory.

use std::{fs, path::Path};

use crate::{
    error::{Error, Result},
    scanner::ByteScanner,
    value::{IoType, Parameter, Shape, Value},
};

/// Render a value in the line format, trailing newline included.
pub fn strize(value: &Value, shape: Shape) -> Result<String> {
    let mut lines = Vec::new();
    strize_nested(value, shape.io_type, shape.dimension, &mut lines)?;
    let mut text = lines.join("\n");
    text.push('\n');
    Ok(text)
}

/// Render several values one after another, in the order of `params`.
pub fn strize_record(values: &[Value], params: &[Parameter]) -> Result<String> {
    if values.len() != params.len() {
        return Err(Error::Data(format!(
            "expected {} values, got {}",
            params.len(),
            values.len()
        )));
    }
    let mut text = String::new();
    for (value, param) in values.iter().zip(params) {
        text.push_str(&strize(value, param.shape)?);
    }
    Ok(text)
}

fn strize_nested(
    value: &Value,
    io_type: IoType,
    dimension: usize,
    lines: &mut Vec<String>,
) -> Result<()> {
    match (dimension, value) {
        (0, Value::Int(x)) => lines.push(x.to_string()),
        (0, Value::Float(x)) => lines.push(format!("{:?}", x)),
        (0, Value::Bool(x)) => lines.push(x.to_string()),
        (0, Value::Str(s)) => {
            lines.push(s.chars().count().to_string());
            lines.extend(s.chars().map(|c| (c as u32).to_string()));
        }
        (d, Value::List(items)) if d > 0 => {
            lines.push(items.len().to_string());
            for item in items {
                strize_nested(item, io_type, d - 1, lines)?;
            }
        }
        (d, other) => {
            return Err(Error::Data(format!(
                "{} does not fit a {}-dimensional {}",
                other, d, io_type
            )))
        }
    }
    Ok(())
}

/// Parse one value from a line iterator, consuming exactly its lines.
pub fn parse_lines<'a, I>(lines: &mut I, shape: Shape) -> Result<Value>
where
    I: Iterator<Item = &'a str>,
{
    let value = parse_nested(lines, shape.io_type, shape.dimension)?;
    shape.check(&value).map_err(Error::Data)?;
    Ok(value)
}

/// Parse every parameter of an input file in the line format.
pub fn parse_record(text: &str, params: &[Parameter]) -> Result<Vec<Value>> {
    let mut lines = text.lines();
    params
        .iter()
        .map(|param| {
            parse_lines(&mut lines, param.shape)
                .map_err(|err| Error::Data(format!("parameter `{}`: {}", param.name, err)))
        })
        .collect()
}

/// Parse a single value in the line format.
pub fn parse_value(text: &str, shape: Shape) -> Result<Value> {
    parse_lines(&mut text.lines(), shape)
}

fn next_line<'a, I>(lines: &mut I) -> Result<&'a str>
where
    I: Iterator<Item = &'a str>,
{
    lines
        .next()
        .map(str::trim)
        .ok_or_else(|| Error::Data("unexpected end of data".into()))
}

fn parse_token<T: std::str::FromStr>(token: &str, what: &str) -> Result<T> {
    token
        .parse()
        .map_err(|_| Error::Data(format!("`{}` is not a valid {}", token, what)))
}

fn parse_nested<'a, I>(lines: &mut I, io_type: IoType, dimension: usize) -> Result<Value>
where
    I: Iterator<Item = &'a str>,
{
    if dimension > 0 {
        let size: usize = parse_token(next_line(lines)?, "length")?;
        let items = (0..size)
            .map(|_| parse_nested(lines, io_type, dimension - 1))
            .collect::<Result<Vec<_>>>()?;
        return Ok(Value::List(items));
    }

    let line = next_line(lines)?;
    let value = match io_type {
        IoType::Int | IoType::Long => Value::Int(parse_token(line, "integer")?),
        IoType::Float | IoType::Double => Value::Float(parse_token(line, "float")?),
        IoType::Bool => match line {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => return Err(Error::Data(format!("`{}` is not a valid bool", line))),
        },
        IoType::Str => {
            let length: usize = parse_token(line, "length")?;
            // the length is untrusted; grow the string as characters arrive
            let mut s = String::new();
            for read in 0..length {
                let code_line = lines.next().ok_or_else(|| {
                    Error::Data(format!(
                        "string declares {} characters but only {} follow",
                        length, read
                    ))
                })?;
                let code: u32 = parse_token(code_line.trim(), "character code")?;
                let c = char::from_u32(code)
                    .ok_or_else(|| Error::Data(format!("{} is not a character", code)))?;
                s.push(c);
            }
            Value::Str(s)
        }
    };
    Ok(value)
}

/// Render a value in the PGized notation.
pub fn pgize(value: &Value) -> String {
    match value {
        Value::Int(x) => x.to_string(),
        Value::Float(x) => {
            let mut s = x.to_string();
            if !s.contains('.') {
                s.push_str(".0");
            }
            s
        }
        Value::Bool(x) => x.to_string(),
        Value::Str(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        Value::List(items) => format!(
            "[{}]",
            items.iter().map(pgize).collect::<Vec<_>>().join(",")
        ),
    }
}

/// Render all parameters of one test, joined by `,`.
pub fn pgize_record(values: &[Value]) -> String {
    values.iter().map(pgize).collect::<Vec<_>>().join(",")
}

/// Parse a PGized value of the given shape.
pub fn parse_pg(text: &str, shape: Shape) -> Result<Value> {
    let mut scanner = ByteScanner::from_bytes(text.as_bytes());
    let value = parse_pg_nested(&mut scanner, shape.io_type, shape.dimension)?;
    expect_pg_end(&mut scanner)?;
    shape.check(&value).map_err(Error::Data)?;
    Ok(value)
}

/// Parse a PGized input file holding every parameter in order.
pub fn parse_pg_record(text: &str, params: &[Parameter]) -> Result<Vec<Value>> {
    let mut scanner = ByteScanner::from_bytes(text.as_bytes());
    let mut values = Vec::with_capacity(params.len());
    for (i, param) in params.iter().enumerate() {
        if i > 0 {
            scanner.skip_whitespace();
            if !scanner.expect_byte(b',') {
                return Err(pg_error(&scanner, "expected `,` between parameters"));
            }
        }
        let value = parse_pg_nested(&mut scanner, param.shape.io_type, param.shape.dimension)?;
        param
            .shape
            .check(&value)
            .map_err(|err| Error::Data(format!("parameter `{}`: {}", param.name, err)))?;
        values.push(value);
    }
    expect_pg_end(&mut scanner)?;
    Ok(values)
}

fn pg_error(scanner: &ByteScanner, msg: &str) -> Error {
    Error::Data(format!("{} at byte {}", msg, scanner.position()))
}

fn expect_pg_end(scanner: &mut ByteScanner) -> Result<()> {
    scanner.skip_whitespace();
    if scanner.expect_eof() {
        Ok(())
    } else {
        Err(pg_error(scanner, "trailing data"))
    }
}

fn parse_pg_nested(scanner: &mut ByteScanner, io_type: IoType, dimension: usize) -> Result<Value> {
    scanner.skip_whitespace();
    if dimension == 0 {
        return parse_pg_scalar(scanner, io_type);
    }

    if !scanner.expect_byte(b'[') {
        return Err(pg_error(scanner, "expected `[`"));
    }
    let mut items = Vec::new();
    scanner.skip_whitespace();
    if scanner.peek() == Some(b']') {
        scanner.read_byte();
        return Ok(Value::List(items));
    }
    loop {
        items.push(parse_pg_nested(scanner, io_type, dimension - 1)?);
        scanner.skip_whitespace();
        match scanner.read_byte() {
            Some(b',') => continue,
            Some(b']') => break,
            _ => return Err(pg_error(scanner, "expected `,` or `]`")),
        }
    }
    Ok(Value::List(items))
}

fn parse_pg_scalar(scanner: &mut ByteScanner, io_type: IoType) -> Result<Value> {
    let token = |scanner: &mut ByteScanner, accept: fn(u8) -> bool| {
        String::from_utf8_lossy(scanner.read_while(accept)).into_owned()
    };
    match io_type {
        IoType::Int | IoType::Long => {
            let t = token(scanner, |x| x.is_ascii_digit() || x == b'-' || x == b'+');
            Ok(Value::Int(parse_token(&t, "integer")?))
        }
        IoType::Float | IoType::Double => {
            let t = token(scanner, |x| {
                x.is_ascii_digit() || matches!(x, b'-' | b'+' | b'.' | b'e' | b'E')
            });
            Ok(Value::Float(parse_token(&t, "float")?))
        }
        IoType::Bool => {
            let t = token(scanner, |x| x.is_ascii_alphabetic());
            match t.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(pg_error(scanner, "expected `true` or `false`")),
            }
        }
        IoType::Str => {
            if !scanner.expect_byte(b'"') {
                return Err(pg_error(scanner, "expected `\"`"));
            }
            let mut bytes = Vec::new();
            loop {
                match scanner.read_byte() {
                    Some(b'"') => break,
                    Some(b'\\') => match scanner.read_byte() {
                        Some(escaped) => bytes.push(escaped),
                        None => return Err(pg_error(scanner, "unterminated escape")),
                    },
                    Some(x) => bytes.push(x),
                    None => return Err(pg_error(scanner, "unterminated string")),
                }
            }
            let s = String::from_utf8(bytes)
                .map_err(|_| pg_error(scanner, "string is not valid utf-8"))?;
            Ok(Value::Str(s))
        }
    }
}

/// Remove previously written test files (`*in`, `*out`, `*txt`) from `path`.
pub fn clean_io_path(path: &Path) -> Result<()> {
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if entry.file_type()?.is_file()
            && ["in", "out", "txt"].iter().any(|ext| name.ends_with(ext))
        {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(xs: &[i64]) -> Value {
        Value::List(xs.iter().map(|x| Value::Int(*x)).collect())
    }

    fn param(name: &str, io_type: IoType, dimension: usize) -> Parameter {
        Parameter {
            name: name.into(),
            shape: Shape { io_type, dimension },
        }
    }

    #[test]
    fn line_format_layout() -> Result<()> {
        let grid = Value::List(vec![ints(&[1, 2]), ints(&[3, 4])]);
        assert_eq!(strize(&grid, Shape::new(IoType::Int, 2)?)?, "2\n2\n1\n2\n2\n3\n4\n");
        assert_eq!(
            strize(&Value::Str("Hi".into()), Shape::scalar(IoType::Str))?,
            "2\n72\n105\n"
        );
        assert_eq!(strize(&Value::Float(0.5), Shape::scalar(IoType::Double))?, "0.5\n");
        assert!(strize(&Value::Int(1), Shape::new(IoType::Int, 1)?).is_err());
        Ok(())
    }

    #[test]
    fn line_format_record() -> Result<()> {
        let params = vec![
            param("a", IoType::Int, 0),
            param("s", IoType::Str, 0),
            param("v", IoType::Double, 1),
        ];
        let text = "7\n3\n97\n98\n99\n2\n1.5\n-2\n";
        let values = parse_record(text, &params)?;
        assert_eq!(
            values,
            vec![
                Value::Int(7),
                Value::Str("abc".into()),
                Value::List(vec![Value::Float(1.5), Value::Float(-2.0)]),
            ]
        );
        assert_eq!(strize_record(&values, &params)?, "7\n3\n97\n98\n99\n2\n1.5\n-2.0\n");
        Ok(())
    }

    #[test]
    fn line_format_rejects_bad_data() {
        let int = Shape::scalar(IoType::Int);
        assert!(parse_value("", int).is_err());
        assert!(parse_value("abc", int).is_err());
        assert!(parse_value("3000000000", int).is_err());
        assert!(parse_value("3000000000", Shape::scalar(IoType::Long)).is_ok());
        assert!(parse_value("yes", Shape::scalar(IoType::Bool)).is_err());
        assert!(parse_value("nan", Shape::scalar(IoType::Double)).is_err());
        // [[1,2],[3]]
        let ragged = "2\n2\n1\n2\n1\n3\n";
        assert!(parse_value(ragged, Shape { io_type: IoType::Int, dimension: 2 }).is_err());
        // string with a quote
        assert!(parse_value("1\n34\n", Shape::scalar(IoType::Str)).is_err());
    }

    #[test]
    fn absurd_string_length_is_an_error() {
        let text = "100000000000000\n72\n105\n";
        match parse_value(text, Shape::scalar(IoType::Str)) {
            Err(Error::Data(msg)) => assert!(msg.contains("only 2 follow"), "{}", msg),
            other => panic!("unexpected result {:?}", other),
        }
        let grid = "100000000000000\n1\n";
        assert!(parse_value(grid, Shape::new(IoType::Int, 1).unwrap()).is_err());
    }

    #[test]
    fn pgized_rendering() {
        assert_eq!(pgize(&Value::Int(-5)), "-5");
        assert_eq!(pgize(&Value::Float(3.0)), "3.0");
        assert_eq!(pgize(&Value::Float(0.25)), "0.25");
        assert_eq!(pgize(&Value::Float(1e-7)), "0.0000001");
        assert_eq!(pgize(&Value::Bool(false)), "false");
        assert_eq!(pgize(&Value::Str("a\\b".into())), "\"a\\\\b\"");
        assert_eq!(
            pgize(&Value::List(vec![ints(&[1, 2]), ints(&[])])),
            "[[1,2],[]]"
        );
        assert_eq!(
            pgize_record(&[Value::Int(1), Value::Str("x".into())]),
            "1,\"x\""
        );
    }

    #[test]
    fn pgized_parsing() -> Result<()> {
        let grid = Shape::new(IoType::Int, 2)?;
        assert_eq!(
            parse_pg("[[1,2],[3,4]]", grid)?,
            Value::List(vec![ints(&[1, 2]), ints(&[3, 4])])
        );
        assert_eq!(parse_pg("[ ]", Shape::new(IoType::Int, 1)?)?, ints(&[]));
        assert!(parse_pg("[[1,2],[3]]", grid).is_err());
        assert!(parse_pg("[1,2", Shape::new(IoType::Int, 1)?).is_err());
        assert!(parse_pg("1 2", Shape::scalar(IoType::Int)).is_err());

        let params = vec![
            param("name", IoType::Str, 0),
            param("weights", IoType::Double, 1),
            param("flag", IoType::Bool, 0),
        ];
        let values = parse_pg_record("\"a\\\\b\",[1.0,-0.5],true\n", &params)?;
        assert_eq!(
            values,
            vec![
                Value::Str("a\\b".into()),
                Value::List(vec![Value::Float(1.0), Value::Float(-0.5)]),
                Value::Bool(true),
            ]
        );
        assert!(parse_pg_record("\"a\"", &params).is_err());
        Ok(())
    }

    #[test]
    fn clean_io_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("01.in.txt"), "1")?;
        fs::write(dir.path().join("01.out"), "1")?;
        fs::write(dir.path().join("notes.md"), "keep")?;
        clean_io_path(dir.path())?;
        let left: Vec<_> = fs::read_dir(dir.path())?
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(left, vec!["notes.md".to_string()]);
        Ok(())
    }
}
