use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{space0, space1},
    combinator::{opt, recognize},
    sequence::pair,
    IResult,
};

/// Parser result over header text
pub type ParseResult<'a, O> = IResult<&'a str, O>;

/// Parses CRLF (accepts \r\n or just \n)
pub fn crlf(input: &str) -> ParseResult<&str> {
    alt((tag("\r\n"), tag("\n")))(input)
}

/// Parses Linear White Space (LWS) according to RFC 3261 Section 25.1
/// LWS = [*WSP CRLF] 1*WSP
pub fn lws(input: &str) -> ParseResult<&str> {
    alt((
        recognize(pair(pair(space0, crlf), space1)),
        space1,
    ))(input)
}

/// SWS = [LWS]
pub fn sws(input: &str) -> ParseResult<&str> {
    opt(lws)(input).map(|(rem, val)| (rem, val.unwrap_or("")))
}

/// Replaces every folded line break (CRLF or LF followed by SP/HT) with a
/// single space and trims the result.
pub fn unfold_lws(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                while matches!(chars.peek(), Some(' ') | Some('\t')) {
                    chars.next();
                }
                out.push(' ');
            }
            other => out.push(other),
        }
    }
    out.trim().to_string()
}
