//! Case-file language.
//!
//! A line-oriented, SPICE-flavoured text format for transient cases. The
//! parser checks structure only; [`lower`] turns the result into a
//! [`SimulationConfig`](crate::solver::SimulationConfig) and a
//! [`NetworkDescription`](crate::network::NetworkDescription).
//!
//! # Grammar Overview
//!
//! ```text
//! case        = { line } [ ".end" ]
//! line        = comment | directive | element | empty
//! comment     = ('#' | ';') { any_char }
//! directive   = '.' directive_name { argument }
//! element     = [keyword] name { argument } { key '=' value }
//! argument    = node | number | signal
//!
//! directive_name = "options" | "bus" | "ic" | "output" | "model"
//! node        = identifier | "0" | "GND"
//! signal      = ('+' | '-') identifier
//! value       = number [unit_suffix] | identifier
//!
//! number      = ['-'] digit+ ['.' digit+] [('e'|'E') ['-'|'+'] digit+]
//! unit_suffix = 'p' | 'n' | 'u' | 'm' | 'k' | 'M' | 'G'
//! ```
//!
//! Commas count as whitespace. Without a keyword the element kind comes
//! from the first letter of its name (`SW` for switches).
//!
//! # Element Types
//!
//! | Type | Description | Syntax |
//! |------|-------------|--------|
//! | R | Resistor | `R<name> <n1> <n2> <ohms>` |
//! | L | Inductor | `L<name> <n1> <n2> <henries> [i0=]` |
//! | C | Capacitor | `C<name> <n1> <n2> <farads> [vc=]` |
//! | RLC | Series R-L-C | `RLC <name> <n1> <n2> r= l= c= [i0=] [vc=]` |
//! | COUPLED | Coupled R-L phases | `COUPLED <name> <a1> <b1> <a2> <b2> .. r11= l21= ..` |
//! | LINE | Lossless or lumped-loss line | `LINE <name> <n1> <n2> z= tau= \| z= v= len= \| lp= cp= len= [r= \| rp=]` |
//! | SW | Switch | `SW<name> <n1> <n2> [tclose=] [topen=] [imar=] \| tacs=<sig> \| MEASURING` |
//! | V, I | Voltage or current source | `V<name> <node> 0 <DC\|COS\|STEP\|RAMP\|SURGE\|TACS> ..` |
//! | D | Diode | `D<name> <anode> <cathode> [model]` |
//! | NONLIN | Model-driven nonlinear branch | `NONLIN <name> <n1> <n2> <model>` |
//! | MACHINE | Synchronous machine | `MACHINE <name> <a> <b> <c> mva= kv= f= xd= xdp= tdop= h= ..` |
//! | TACS | Control block | `TACS <name> <kind> [target] {[+\|-]input} ..` |
//!
//! # Directives
//!
//! | Directive | Description | Syntax |
//! |-----------|-------------|--------|
//! | .options | Run parameters | `.options dt=50u tmax=20m [iout=] [init=zero\|steady] ..` |
//! | .bus | Declare a multi-phase bus | `.bus <name> phases=<n>` |
//! | .ic | Initial node voltage | `.ic <node> <volts>` |
//! | .output | Report these node voltages | `.output <node>..` |
//! | .model | Nonlinear characteristic | `.model <name> <D\|ARR\|PWL\|FLUX> (<params or points>)` |
//!
//! # Example
//!
//! ```text
//! # Energizing a capacitor bank
//! .options dt=10u tmax=20m
//! .output SRC B
//!
//! VS   SRC 0   COS amp=100 freq=60
//! R1   SRC A   10
//! L1   A   0   10m
//! C1   B   0   10u
//! SW1  A   B   tclose=2m
//! ```

mod ast;
mod lexer;
mod lower;
mod parser;

pub use ast::*;
pub use lexer::{parse_value, Lexer, Token, TokenKind};
pub use lower::{lower, Case};
pub use parser::Parser;

use crate::error::Result;

/// Parse case text into an AST.
pub fn parse(input: &str) -> Result<CaseAst> {
    let lexer = Lexer::new(input);
    let mut parser = Parser::new(lexer)?;
    parser.parse()
}

/// Parse and lower case text.
pub fn load_case(input: &str) -> Result<Case> {
    lower(&parse(input)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmtpError;
    use crate::network::Network;
    use crate::solver::Simulator;
    use approx::assert_relative_eq;

    const CAPACITOR_BANK: &str = "\
# Energizing a capacitor bank
.options dt=10u tmax=20m iout=10
.output SRC B

VS   SRC 0   COS amp=100 freq=60
R1   SRC A   10
L1   A   0   10m
C1   B   0   10u
SW1  A   B   tclose=2m
";

    #[test]
    fn test_case_runs_end_to_end() {
        let case = load_case(CAPACITOR_BANK).unwrap();
        let network = Network::load(&case.network).unwrap();
        let mut sim = Simulator::new(network, case.config).unwrap();
        let out = sim.run();
        assert!(out.failure.is_none());
        assert_eq!(out.samples.len(), 201);
        let src = out.series("V(SRC)").unwrap();
        assert_relative_eq!(src[0], 100.0);
        // Capacitor uncharged until the switch closes
        let b = out.series("V(B)").unwrap();
        assert!(b[..20].iter().all(|v| *v == 0.0));
        assert!(b[30..].iter().any(|v| v.abs() > 1.0));
    }

    #[test]
    fn test_end_stops_parsing() {
        let ast = parse("R1 A 0 1\n.end\nthis is not parsed @\n").unwrap();
        assert_eq!(ast.elements.len(), 1);
    }

    #[test]
    fn test_errors_carry_lines() {
        let err = load_case("R1 A 0 1\nQ1 A B C\n").unwrap_err();
        assert!(matches!(err, EmtpError::UnknownElementType { line: 2, .. }));
    }
}
