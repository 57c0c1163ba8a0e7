//! Equivalent circuit models of a battery cell.
//!
//! A circuit is written in the usual string notation: elements are joined in series with `-`
//! and grouped in parallel with `p(a, b, ...)`. Every element is a type prefix followed by a
//! label, so `R0-p(R1,C1)-p(R2-Ws1,C2)` is the Randles circuit extended with an interface layer.
//!
//! Parameters are ordered depth-first, left to right, as the elements appear in the string.
use std::f64::consts::{FRAC_PI_2, PI};
use std::fmt;
use std::str::FromStr;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Circuit topologies used for trend analysis
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topology {
    /// `R0-p(R1,C1)-p(R2-Ws1,C2)`, seven parameters
    Randles,
    /// `R0-p(R1,C1)-p(R2-Ws1,C2)-p(R3,C3)`, nine parameters
    RandlesWithRc,
}

impl Topology {
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Randles => "R0-p(R1,C1)-p(R2-Ws1,C2)",
            Self::RandlesWithRc => "R0-p(R1,C1)-p(R2-Ws1,C2)-p(R3,C3)",
        }
    }

    /// Starting point for a fit of a fresh lithium-ion cell
    #[must_use]
    pub fn initial_guess(self) -> Vec<f64> {
        let mut guess = vec![4.18e-01, 2.64e-01, 2.13e-02, 1.17e-01, 1.62e+00, 1.42e+02, 1.42e-03];
        if self == Self::RandlesWithRc {
            guess.extend([0.2, 0.03]);
        }
        guess
    }

    #[must_use]
    pub fn circuit(self) -> Circuit {
        // The preset strings are fixed and known to parse
        Circuit::parse(self.description()).expect("preset circuits are well formed")
    }
}

impl FromStr for Topology {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "randles" => Ok(Self::Randles),
            "randles-with-rc" => Ok(Self::RandlesWithRc),
            other => Err(Error::Config(format!("unknown topology `{other}`"))),
        }
    }
}

/// The lumped elements a circuit can be built from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Element {
    Resistor,
    Capacitor,
    Inductor,
    /// Semi-infinite Warburg diffusion
    Warburg,
    /// Finite-length Warburg with a transmissive (short) boundary
    WarburgShort,
    /// Finite-space Warburg with a reflective (open) boundary
    WarburgOpen,
    ConstantPhase,
}

impl Element {
    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "R" => Some(Self::Resistor),
            "C" => Some(Self::Capacitor),
            "L" => Some(Self::Inductor),
            "W" => Some(Self::Warburg),
            "Ws" => Some(Self::WarburgShort),
            "Wo" => Some(Self::WarburgOpen),
            "CPE" => Some(Self::ConstantPhase),
            _ => None,
        }
    }

    #[must_use]
    pub const fn num_params(self) -> usize {
        match self {
            Self::Resistor | Self::Capacitor | Self::Inductor | Self::Warburg => 1,
            Self::WarburgShort | Self::WarburgOpen | Self::ConstantPhase => 2,
        }
    }

    /// Upper limit of each parameter. Every parameter is physically non-negative.
    fn upper_bounds(self) -> &'static [f64] {
        match self {
            Self::Resistor | Self::Capacitor | Self::Inductor | Self::Warburg => &[f64::INFINITY],
            Self::WarburgShort | Self::WarburgOpen => &[f64::INFINITY, f64::INFINITY],
            // The exponent of a constant phase element lies between a resistor and a capacitor
            Self::ConstantPhase => &[f64::INFINITY, 1.],
        }
    }

    /// Impedance of the element at angular frequency `omega`
    fn impedance(self, p: &[f64], omega: f64) -> Complex64 {
        match self {
            Self::Resistor => Complex64::new(p[0], 0.),
            Self::Capacitor => Complex64::new(0., -1. / (omega * p[0])),
            Self::Inductor => Complex64::new(0., omega * p[0]),
            Self::Warburg => Complex64::new(p[0], -p[0]) / omega.sqrt(),
            Self::WarburgShort => {
                let x = Complex64::new(0., omega * p[1]).sqrt();
                if x.norm() < 1e-8 {
                    // tanh(x) / x -> 1
                    return Complex64::new(p[0], 0.);
                }
                p[0] * tanh(x) / x
            }
            Self::WarburgOpen => {
                let x = Complex64::new(0., omega * p[1]).sqrt();
                p[0] / (tanh(x) * x)
            }
            Self::ConstantPhase => {
                let (q, alpha) = (p[0], p[1]);
                Complex64::from_polar(omega.powf(alpha), FRAC_PI_2 * alpha)
                    .scale(q)
                    .inv()
            }
        }
    }
}

/// Hyperbolic tangent for arguments with a non-negative real part.
///
/// The textbook `sinh / cosh` form overflows to `NaN` once the real part passes ~355, which
/// happens for diffusion time constants of a few seconds at kHz frequencies.
fn tanh(x: Complex64) -> Complex64 {
    let decay = (-2. * x).exp();
    (1. - decay) / (1. + decay)
}

#[derive(Clone, Debug, PartialEq)]
enum Node {
    Element { kind: Element, label: String },
    Series(Vec<Node>),
    Parallel(Vec<Node>),
}

impl Node {
    fn evaluate(&self, params: &[f64], cursor: &mut usize, omega: f64) -> Complex64 {
        match self {
            Self::Element { kind, .. } => {
                let n = kind.num_params();
                let z = kind.impedance(&params[*cursor..*cursor + n], omega);
                *cursor += n;
                z
            }
            Self::Series(nodes) => nodes
                .iter()
                .map(|node| node.evaluate(params, cursor, omega))
                .sum(),
            Self::Parallel(nodes) => nodes
                .iter()
                .map(|node| node.evaluate(params, cursor, omega).inv())
                .sum::<Complex64>()
                .inv(),
        }
    }

    fn elements<'a>(&'a self, out: &mut Vec<(Element, &'a str)>) {
        match self {
            Self::Element { kind, label } => out.push((*kind, label.as_str())),
            Self::Series(nodes) | Self::Parallel(nodes) => {
                for node in nodes {
                    node.elements(out);
                }
            }
        }
    }
}

/// An equivalent circuit with a fixed topology
#[derive(Clone, Debug, PartialEq)]
pub struct Circuit {
    description: String,
    root: Node,
    parameter_names: Vec<String>,
    lower_bounds: Vec<f64>,
    upper_bounds: Vec<f64>,
}

impl Circuit {
    /// Parse a circuit from its string notation. Whitespace is ignored.
    ///
    /// # Errors
    /// Returns [`Error::CircuitSyntax`] for unknown elements, unbalanced groups, parallel groups
    /// with a single branch, or repeated element labels.
    pub fn parse(circuit: &str) -> Result<Self> {
        let description: String = circuit.chars().filter(|c| !c.is_whitespace()).collect();
        let mut parser = Parser {
            input: &description,
            position: 0,
        };
        let root = parser.series()?;
        if parser.position != description.len() {
            return Err(parser.error("unexpected trailing characters"));
        }

        let mut elements = vec![];
        root.elements(&mut elements);

        let mut parameter_names = vec![];
        let mut upper_bounds = vec![];
        for (ii, (kind, label)) in elements.iter().enumerate() {
            if elements[..ii].iter().any(|(_, other)| other == label) {
                return Err(Error::CircuitSyntax {
                    circuit: description.clone(),
                    position: 0,
                    reason: format!("element `{label}` appears more than once"),
                });
            }
            if kind.num_params() == 1 {
                parameter_names.push((*label).to_owned());
            } else {
                parameter_names.extend((0..kind.num_params()).map(|jj| format!("{label}_{jj}")));
            }
            upper_bounds.extend_from_slice(kind.upper_bounds());
        }
        let lower_bounds = vec![0.; parameter_names.len()];

        Ok(Self {
            description,
            root,
            parameter_names,
            lower_bounds,
            upper_bounds,
        })
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn num_params(&self) -> usize {
        self.parameter_names.len()
    }

    /// Parameter names in vector order, such as `R0` or `Ws1_1`
    #[must_use]
    pub fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    #[must_use]
    pub fn lower_bounds(&self) -> &[f64] {
        &self.lower_bounds
    }

    #[must_use]
    pub fn upper_bounds(&self) -> &[f64] {
        &self.upper_bounds
    }

    /// Check a parameter vector matches the circuit
    ///
    /// # Errors
    /// Returns [`Error::ParameterCountMismatch`] when the lengths differ.
    pub fn check_params(&self, params: &[f64]) -> Result<()> {
        if params.len() == self.num_params() {
            Ok(())
        } else {
            Err(Error::ParameterCountMismatch {
                circuit: self.description.clone(),
                expected: self.num_params(),
                got: params.len(),
            })
        }
    }

    /// Complex impedance of the circuit at `frequency` (Hz)
    ///
    /// # Panics
    /// If `params` is shorter than [`Circuit::num_params`].
    #[must_use]
    pub fn impedance(&self, params: &[f64], frequency: f64) -> Complex64 {
        let mut cursor = 0;
        self.root.evaluate(params, &mut cursor, 2. * PI * frequency)
    }

    /// Impedance predicted at each frequency
    #[must_use]
    pub fn predict(&self, params: &[f64], frequencies: &[f64]) -> Vec<Complex64> {
        frequencies
            .iter()
            .map(|&frequency| self.impedance(params, frequency))
            .collect()
    }
}

impl FromStr for Circuit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<Topology>()
            .map(Topology::circuit)
            .or_else(|_| Self::parse(s))
    }
}

impl fmt::Display for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description)
    }
}

struct Parser<'a> {
    input: &'a str,
    position: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.position).copied()
    }

    fn error(&self, reason: &str) -> Error {
        Error::CircuitSyntax {
            circuit: self.input.to_owned(),
            position: self.position,
            reason: reason.to_owned(),
        }
    }

    fn series(&mut self) -> Result<Node> {
        let mut nodes = vec![self.term()?];
        while self.peek() == Some(b'-') {
            self.position += 1;
            nodes.push(self.term()?);
        }
        Ok(if nodes.len() == 1 {
            nodes.remove(0)
        } else {
            Node::Series(nodes)
        })
    }

    fn term(&mut self) -> Result<Node> {
        if self.input[self.position..].starts_with("p(") {
            self.position += 2;
            let mut branches = vec![self.series()?];
            while self.peek() == Some(b',') {
                self.position += 1;
                branches.push(self.series()?);
            }
            if self.peek() != Some(b')') {
                return Err(self.error("expected `)` closing the parallel group"));
            }
            self.position += 1;
            if branches.len() < 2 {
                return Err(self.error("a parallel group needs at least two branches"));
            }
            return Ok(Node::Parallel(branches));
        }
        self.element()
    }

    fn element(&mut self) -> Result<Node> {
        let start = self.position;
        let rest = &self.input.as_bytes()[start..];
        let letters = rest.iter().take_while(|c| c.is_ascii_alphabetic()).count();
        let digits = rest[letters..]
            .iter()
            .take_while(|c| c.is_ascii_alphanumeric() || **c == b'_')
            .count();

        if letters == 0 {
            return Err(self.error("expected an element"));
        }
        let prefix = &self.input[start..start + letters];
        let kind = Element::from_prefix(prefix)
            .ok_or_else(|| self.error(&format!("unknown element type `{prefix}`")))?;
        if digits == 0 {
            self.position += letters;
            return Err(self.error("element needs a label such as `0` or `1`"));
        }

        self.position += letters + digits;
        Ok(Node::Element {
            kind,
            label: self.input[start..self.position].to_owned(),
        })
    }
}
