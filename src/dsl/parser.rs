//! Parser for the case-file language.

use std::collections::HashMap;

use super::ast::*;
use super::lexer::{parse_value, Lexer, Token, TokenKind};
use crate::error::{EmtpError, Result};

/// Parser for case files.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
}

impl<'a> Parser<'a> {
    /// Create a new parser with the given lexer.
    pub fn new(mut lexer: Lexer<'a>) -> Result<Self> {
        let current = lexer.next_token()?;
        Ok(Self { lexer, current })
    }

    /// Parse the entire case.
    pub fn parse(&mut self) -> Result<CaseAst> {
        let mut ast = CaseAst::new();

        while self.current.kind != TokenKind::Eof {
            match self.current.kind {
                TokenKind::Newline => {
                    self.advance()?;
                    continue;
                }
                TokenKind::Directive => {
                    if self.current.text.eq_ignore_ascii_case(".end") {
                        break;
                    }
                    self.parse_directive(&mut ast)?;
                }
                TokenKind::Identifier => {
                    let element = self.parse_element()?;
                    ast.elements.push(element);
                }
                _ => {
                    return Err(EmtpError::parse(
                        self.current.line,
                        format!("unexpected token: {:?}", self.current.text),
                    ));
                }
            }
            self.end_of_line()?;
        }

        Ok(ast)
    }

    fn advance(&mut self) -> Result<()> {
        self.current = self.lexer.next_token()?;
        Ok(())
    }

    fn at_line_end(&self) -> bool {
        matches!(self.current.kind, TokenKind::Newline | TokenKind::Eof)
    }

    fn end_of_line(&mut self) -> Result<()> {
        match self.current.kind {
            TokenKind::Newline => self.advance(),
            TokenKind::Eof => Ok(()),
            _ => Err(EmtpError::parse(
                self.current.line,
                format!("unexpected trailing token: {:?}", self.current.text),
            )),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        if self.current.kind == kind {
            let tok = self.current.clone();
            self.advance()?;
            Ok(tok)
        } else {
            Err(EmtpError::parse(
                self.current.line,
                format!("expected {:?}, got {:?}", kind, self.current.text),
            ))
        }
    }

    /// A name: an identifier, or a number used as a node name.
    fn expect_name(&mut self) -> Result<String> {
        match self.current.kind {
            TokenKind::Identifier | TokenKind::Number => {
                let text = self.current.text.clone();
                self.advance()?;
                Ok(text)
            }
            _ => Err(EmtpError::parse(
                self.current.line,
                format!("expected a name, got {:?}", self.current.text),
            )),
        }
    }

    fn expect_number(&mut self) -> Result<f64> {
        let tok = self.expect(TokenKind::Number)?;
        parse_value(&tok.text).ok_or_else(|| EmtpError::parse(tok.line, format!("invalid number: {}", tok.text)))
    }

    /// The value after `key=`.
    fn parse_param_value(&mut self) -> Result<ParamValue> {
        let line = self.current.line;
        match self.current.kind {
            TokenKind::Number => {
                let text = self.current.text.clone();
                self.advance()?;
                parse_value(&text)
                    .map(ParamValue::Number)
                    .ok_or_else(|| EmtpError::parse(line, format!("invalid number: {text}")))
            }
            TokenKind::Identifier => {
                let text = self.current.text.clone();
                self.advance()?;
                Ok(parse_value(&text).map_or(ParamValue::Word(text), ParamValue::Number))
            }
            _ => Err(EmtpError::parse(line, "expected parameter value")),
        }
    }

    fn parse_directive(&mut self, ast: &mut CaseAst) -> Result<()> {
        let directive = self.current.text.clone();
        let line = self.current.line;
        self.advance()?;

        match directive.to_lowercase().as_str() {
            ".options" | ".option" => {
                while !self.at_line_end() {
                    let key = self.expect(TokenKind::Identifier)?.text.to_lowercase();
                    self.expect(TokenKind::Equals)?;
                    let value = self.parse_param_value()?;
                    ast.options.push(OptionDef { key, value, line });
                }
            }
            ".bus" => {
                let name = self.expect_name()?;
                let mut phases = 1;
                while !self.at_line_end() {
                    let key = self.expect(TokenKind::Identifier)?.text;
                    self.expect(TokenKind::Equals)?;
                    let value = self.expect_number()?;
                    if !key.eq_ignore_ascii_case("phases") || value < 1.0 || value.fract() != 0.0 {
                        return Err(EmtpError::parse(line, format!("invalid bus parameter {key}={value}")));
                    }
                    phases = value as usize;
                }
                ast.buses.push(BusDef { name, phases, line });
            }
            ".ic" => {
                let node = self.expect_name()?;
                let value = self.expect_number()?;
                ast.initial_conditions.push(InitialCondition { node, value, line });
            }
            ".output" => {
                while !self.at_line_end() {
                    let node = self.expect_name()?;
                    ast.outputs.push(node);
                }
            }
            ".model" => {
                let model = self.parse_model_def(line)?;
                if ast.models.contains_key(&model.name) {
                    return Err(EmtpError::DuplicateModel { name: model.name });
                }
                ast.models.insert(model.name.clone(), model);
            }
            _ => {
                return Err(EmtpError::parse(line, format!("unknown directive: {directive}")));
            }
        }

        Ok(())
    }

    fn parse_model_def(&mut self, line: usize) -> Result<ModelDef> {
        let name = self.expect(TokenKind::Identifier)?.text;
        let type_str = self.expect(TokenKind::Identifier)?.text;

        let model_type = ModelType::from_name(&type_str)
            .ok_or_else(|| EmtpError::parse(line, format!("unknown model type: {type_str}")))?;

        let mut params = HashMap::new();
        let mut values = Vec::new();

        // Parameters, optionally in parentheses: (is=1e-14 n=1) or (0 0 1 10)
        let parenthesized = self.current.kind == TokenKind::OpenParen;
        if parenthesized {
            self.advance()?;
        }
        while !self.at_line_end() && self.current.kind != TokenKind::CloseParen {
            if self.current.kind == TokenKind::Number {
                values.push(self.expect_number()?);
                continue;
            }
            let key = self.expect(TokenKind::Identifier)?.text.to_lowercase();
            self.expect(TokenKind::Equals)?;
            let value = self.expect_number()?;
            params.insert(key, value);
        }
        if parenthesized {
            self.expect(TokenKind::CloseParen)?;
        }

        Ok(ModelDef {
            name,
            model_type,
            params,
            values,
            line,
        })
    }

    fn parse_element(&mut self) -> Result<ElementDef> {
        let first_token = self.current.text.clone();
        let line = self.current.line;
        self.advance()?;

        // Keywords first (the next token is the name), then name prefixes
        let (kind, name) = if let Some(kind) = ElementKind::from_keyword(&first_token) {
            (kind, self.expect(TokenKind::Identifier)?.text)
        } else if first_token.to_uppercase().starts_with("SW") {
            (ElementKind::Switch, first_token)
        } else {
            let prefix = first_token.chars().next().unwrap_or('?');
            let kind = ElementKind::from_prefix(prefix).ok_or_else(|| EmtpError::UnknownElementType {
                element_type: first_token.clone(),
                line,
            })?;
            (kind, first_token)
        };

        let mut args = Vec::new();
        let mut params = HashMap::new();

        while !self.at_line_end() {
            let tok = self.current.clone();
            self.advance()?;
            match tok.kind {
                TokenKind::Identifier if self.current.kind == TokenKind::Equals => {
                    self.advance()?;
                    let value = self.parse_param_value()?;
                    params.insert(tok.text.to_lowercase(), value);
                }
                TokenKind::Identifier => args.push(Arg::Word(tok.text)),
                TokenKind::Number => {
                    let value = parse_value(&tok.text)
                        .ok_or_else(|| EmtpError::invalid_element(&name, line, format!("invalid number: {}", tok.text)))?;
                    args.push(Arg::Number { text: tok.text, value });
                }
                TokenKind::Signal => {
                    let negate = tok.text.starts_with('-');
                    args.push(Arg::Signal {
                        name: tok.text[1..].to_string(),
                        negate,
                    });
                }
                _ => {
                    return Err(EmtpError::invalid_element(
                        &name,
                        line,
                        format!("unexpected token {:?}", tok.text),
                    ));
                }
            }
        }

        if args.len() < kind.min_args() {
            return Err(EmtpError::invalid_element(
                &name,
                line,
                format!("expected at least {} arguments, got {}", kind.min_args(), args.len()),
            ));
        }

        Ok(ElementDef {
            kind,
            name,
            args,
            params,
            line,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn parse(input: &str) -> Result<CaseAst> {
        super::super::parse(input)
    }

    #[test]
    fn test_parse_resistor() {
        let ast = parse("R1 BUS1 0 10k").unwrap();
        assert_eq!(ast.elements.len(), 1);
        let r = &ast.elements[0];
        assert_eq!(r.kind, ElementKind::Resistor);
        assert_eq!(r.name, "R1");
        assert_eq!(r.args[0], Arg::Word("BUS1".to_string()));
        assert_eq!(r.args[1].as_name(), Some("0"));
        assert_eq!(r.args[2].as_number(), Some(10_000.0));
    }

    #[test]
    fn test_keyword_takes_next_token_as_name() {
        let ast = parse("LINE L1 A B z=400 tau=1m\nSW BRK A B tacs=TRIP\nSWITCH2 A C MEASURING").unwrap();
        assert_eq!(ast.elements[0].kind, ElementKind::Line);
        assert_eq!(ast.elements[0].name, "L1");
        assert_eq!(ast.elements[0].params["tau"], ParamValue::Number(1e-3));
        assert_eq!(ast.elements[1].kind, ElementKind::Switch);
        assert_eq!(ast.elements[1].params["tacs"], ParamValue::Word("TRIP".to_string()));
        assert_eq!(ast.elements[2].name, "SWITCH2");
        assert_eq!(ast.elements[2].args[2], Arg::Word("MEASURING".to_string()));
    }

    #[test]
    fn test_parse_directives() {
        let input = ".options dt=50u tmax=20m init=steady\n.bus GEN phases=3\n.ic A 1.5\n.output A B\n.end\nR1 A 0 1";
        let ast = parse(input).unwrap();
        assert_eq!(ast.option("dt"), Some(&ParamValue::Number(50e-6)));
        assert_eq!(ast.option("init").and_then(ParamValue::as_word), Some("steady"));
        assert_eq!(ast.buses[0].phases, 3);
        assert_eq!(ast.initial_conditions[0].value, 1.5);
        assert_eq!(ast.outputs, ["A", "B"]);
        // Nothing after .end is read
        assert!(ast.elements.is_empty());
    }

    #[test]
    fn test_parse_model() {
        let ast = parse(".model DCLIP D (is=1e-14 n=1.8)\n.model MOV PWL (0 0 1k 1 2k 100)").unwrap();
        let model = &ast.models["DCLIP"];
        assert_eq!(model.model_type, ModelType::Diode);
        assert!((model.params["is"] - 1e-14).abs() < 1e-20);
        assert_eq!(ast.models["MOV"].values, [0.0, 0.0, 1e3, 1.0, 2e3, 100.0]);
    }

    #[test]
    fn test_duplicate_model() {
        let err = parse(".model A D ()\n.model A D ()").unwrap_err();
        assert!(matches!(err, EmtpError::DuplicateModel { ref name } if name == "A"));
    }

    #[test]
    fn test_signals() {
        let ast = parse("TACS ERR GAIN +REF -FB k=2").unwrap();
        let e = &ast.elements[0];
        assert_eq!(e.kind, ElementKind::Tacs);
        assert_eq!(
            e.args[1..],
            [
                Arg::Signal {
                    name: "REF".to_string(),
                    negate: false
                },
                Arg::Signal {
                    name: "FB".to_string(),
                    negate: true
                },
            ]
        );
    }

    #[test]
    fn test_errors() {
        let unknown = parse("X1 A B 1").unwrap_err();
        assert!(matches!(unknown, EmtpError::UnknownElementType { line: 1, .. }));
        assert_eq!(unknown.kind(), ErrorKind::Parse);

        let short = parse("\nR1 A").unwrap_err();
        assert!(matches!(short, EmtpError::InvalidElement { line: 2, .. }));

        assert!(matches!(parse(".frobnicate"), Err(EmtpError::ParseError { .. })));
        assert!(matches!(parse(".ic A"), Err(EmtpError::ParseError { .. })));
    }

    #[test]
    fn test_parse_with_comments() {
        let input = "# A comment\nR1 A B 1k ; inline comment\n\n";
        let ast = parse(input).unwrap();
        assert_eq!(ast.elements.len(), 1);
    }
}
