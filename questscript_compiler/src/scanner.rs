//! The scanner: source text to token stream.
//!
//! Recognition is a `logos`-derived lexer; this module adds interning.
//! Identifiers and literals become symbol-table entries (literal entries are
//! tagged with their literal kind, string literals are copied into the
//! script's string blob), punctuation resolves to the predefined handles,
//! and every token records its (section, line) position.

use logos::Logos;

use crate::emitter::CompiledScript;
use crate::error::{CompileError, CompileResult, ErrorKind};
use crate::source::TokenData;
use crate::symbols::{SymbolKind, SymbolTable};

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\f]+")]
enum Token {
    #[token("\n")]
    Newline,

    #[regex(r"//[^\n]*")]
    LineComment,

    // Standard non-nesting block comment; may span lines.
    #[regex(r"/\*[^*]*\*+(?:[^/*][^*]*\*+)*/")]
    BlockComment,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,

    #[regex(r"[0-9]+\.[0-9]+")]
    FloatLit,

    #[regex(r"[0-9]+")]
    IntLit,

    #[regex(r#""(?:[^"\\\n]|\\.)*""#)]
    StringLit,

    #[regex(r"'(?:[^'\\\n]|\\.)'")]
    CharLit,

    #[token("(")]
    #[token(")")]
    #[token("[")]
    #[token("]")]
    #[token("{")]
    #[token("}")]
    #[token(".")]
    #[token(",")]
    #[token(";")]
    #[token("::")]
    #[token(":")]
    #[token("?")]
    #[token("=")]
    #[token("+=")]
    #[token("-=")]
    #[token("*=")]
    #[token("/=")]
    #[token("%=")]
    #[token("&=")]
    #[token("|=")]
    #[token("^=")]
    #[token("<<=")]
    #[token(">>=")]
    #[token("++")]
    #[token("--")]
    #[token("!")]
    #[token("~")]
    #[token("*")]
    #[token("/")]
    #[token("%")]
    #[token("+")]
    #[token("-")]
    #[token("<<")]
    #[token(">>")]
    #[token("<")]
    #[token("<=")]
    #[token(">")]
    #[token(">=")]
    #[token("==")]
    #[token("!=")]
    #[token("&")]
    #[token("^")]
    #[token("|")]
    #[token("&&")]
    #[token("||")]
    #[token("...")]
    Punct,
}

/// Process the escapes of a quoted literal body.
fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// The name under which a string literal is interned (quotes kept so it can
/// never collide with an identifier).
pub fn string_literal_name(content: &str) -> String {
    format!("\"{}\"", content)
}

/// The content of an interned string-literal name.
pub fn string_literal_content(name: &str) -> &str {
    name.strip_prefix('"')
        .and_then(|n| n.strip_suffix('"'))
        .unwrap_or(name)
}

/// Scan one section of source text, appending to the token stream.
///
/// String literals land in `scrip.strings`; the literal's symbol `offset`
/// is its blob offset, which the parser emits with a String fixup.
pub fn scan(
    source: &str,
    section: &str,
    data: &mut TokenData,
    sym: &mut SymbolTable,
    scrip: &mut CompiledScript,
) -> CompileResult<()> {
    let section_id = data.add_section(section);
    let mut lineno: u32 = 1;
    let mut lex = Token::lexer(source);

    while let Some(result) = lex.next() {
        let slice = lex.slice();
        let token = result.map_err(|()| {
            CompileError::new(
                ErrorKind::Syntax,
                section,
                lineno,
                format!("Unrecognized token starting with '{}'", &slice[..slice.len().min(8)]),
            )
        })?;

        match token {
            Token::Newline => {
                lineno += 1;
                continue;
            }
            Token::LineComment => continue,
            Token::BlockComment => {
                lineno += slice.matches('\n').count() as u32;
                continue;
            }
            Token::Ident | Token::Punct => {
                let s = sym.find_or_add(slice);
                data.push_token(s, section_id, lineno);
            }
            Token::IntLit => {
                let s = sym.find_or_add(slice);
                if sym.kind(s) == SymbolKind::NoType {
                    sym[s].kind = SymbolKind::LiteralInt;
                }
                data.push_token(s, section_id, lineno);
            }
            Token::FloatLit => {
                let s = sym.find_or_add(slice);
                if sym.kind(s) == SymbolKind::NoType {
                    sym[s].kind = SymbolKind::LiteralFloat;
                }
                data.push_token(s, section_id, lineno);
            }
            Token::CharLit => {
                let content = unescape(&slice[1..slice.len() - 1]);
                let value = content.chars().next().map(|c| c as u32).unwrap_or(0);
                let text = value.to_string();
                let s = sym.find_or_add(&text);
                if sym.kind(s) == SymbolKind::NoType {
                    sym[s].kind = SymbolKind::LiteralInt;
                }
                data.push_token(s, section_id, lineno);
            }
            Token::StringLit => {
                let content = unescape(&slice[1..slice.len() - 1]);
                let name = string_literal_name(&content);
                let s = sym.find_or_add(&name);
                if sym.kind(s) == SymbolKind::NoType {
                    sym[s].kind = SymbolKind::LiteralString;
                    sym[s].offset = scrip.add_string(&content);
                }
                data.push_token(s, section_id, lineno);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::predef;
    use crate::source::SrcList;

    fn scan_all(source: &str) -> (TokenData, SymbolTable, CompiledScript) {
        let mut data = TokenData::new();
        let mut sym = SymbolTable::new();
        let mut scrip = CompiledScript::new();
        scan(source, "main", &mut data, &mut sym, &mut scrip).expect("scan failed");
        (data, sym, scrip)
    }

    #[test]
    fn test_declaration_tokens() {
        let (data, sym, _scrip) = scan_all("int x = 7;");
        let mut src = SrcList::whole(&data);
        assert_eq!(src.get_next(), predef::INT);
        let x = src.get_next();
        assert_eq!(sym.name(x), "x");
        assert_eq!(sym.kind(x), SymbolKind::NoType);
        assert_eq!(src.get_next(), predef::ASSIGN);
        let seven = src.get_next();
        assert_eq!(sym.kind(seven), SymbolKind::LiteralInt);
        assert_eq!(sym.name(seven), "7");
        assert_eq!(src.get_next(), predef::SEMICOLON);
        assert!(src.reached_eof());
    }

    #[test]
    fn test_multichar_operators_win() {
        let (data, sym, _) = scan_all("a <<= b >> c >= d == e");
        let src = SrcList::whole(&data);
        assert_eq!(src.at(1), sym.find("<<=").unwrap());
        assert_eq!(src.at(3), sym.find(">>").unwrap());
        assert_eq!(src.at(5), sym.find(">=").unwrap());
        assert_eq!(src.at(7), sym.find("==").unwrap());
    }

    #[test]
    fn test_line_numbers_and_comments() {
        let (data, _, _) = scan_all("int a;\n// gone\nint b; /* multi\nline */ int c;");
        let src = SrcList::whole(&data);
        assert_eq!(src.lineno_at(0), 1); // int
        assert_eq!(src.lineno_at(3), 3); // second int
        assert_eq!(src.lineno_at(6), 4); // third int, after the comment
    }

    #[test]
    fn test_string_literal_goes_into_blob() {
        let (data, sym, scrip) = scan_all(r#"x = "hey\nyou";"#);
        let src = SrcList::whole(&data);
        let lit = src.at(2);
        assert_eq!(sym.kind(lit), SymbolKind::LiteralString);
        assert_eq!(sym[lit].offset, 0);
        assert_eq!(&scrip.strings, b"hey\nyou\0");
        // literal name cannot collide with the identifier `x`
        assert_ne!(sym.name(lit), "x");
    }

    #[test]
    fn test_char_literal_becomes_int_literal() {
        let (data, sym, _) = scan_all("c = 'A';");
        let src = SrcList::whole(&data);
        let lit = src.at(2);
        assert_eq!(sym.kind(lit), SymbolKind::LiteralInt);
        assert_eq!(sym.name(lit), "65");
    }

    #[test]
    fn test_unrecognized_token_errors() {
        let mut data = TokenData::new();
        let mut sym = SymbolTable::new();
        let mut scrip = CompiledScript::new();
        let err = scan("int @x;", "main", &mut data, &mut sym, &mut scrip).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.line, 1);
    }
}
