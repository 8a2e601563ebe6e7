//! Line-oriented instruction programs and their sequential execution.
//!
//! Every party executes the same program over its own shares; operations
//! that need communication rendezvous through the engine. Instructions name
//! operands and results by string identifier.

use std::collections::{BTreeMap, HashMap};

use num_bigint::BigUint;
use tracing::{trace, warn};

use crate::engine::{EngineError, PartyEngine};

/// One parsed instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    /// `INPUT <owner> <id>`: the owner deals shares of its input value.
    Input { owner: usize, id: String },
    /// `ADD <a> <b> <c>`
    Add { a: String, b: String, c: String },
    /// `MULTIPLY <a> <b> <c>`
    Multiply { a: String, b: String, c: String },
    /// `SCALE <k> <a> <c>`
    Scale { factor: BigUint, a: String, c: String },
    /// `ADD_CONSTANT <k> <a> <c>`
    AddConstant {
        constant: BigUint,
        a: String,
        c: String,
    },
    /// `OPEN <id>`: broadcast the own share of id.
    Open { id: String },
    /// `OUTPUT <id>`: reconstruct id into the result map.
    Output { id: String },
    /// `RANDOM_BIT <id>`
    RandomBit { id: String },
}

/// Parse a program. Blank lines and unknown opcodes are skipped; malformed
/// operands skip the instruction with a diagnostic.
pub fn parse_program(source: &str) -> Vec<Instruction> {
    let mut program = Vec::new();
    for (number, line) in source.lines().enumerate() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }
        match parse_instruction(&tokens) {
            Ok(instruction) => program.push(instruction),
            Err(Malformed) => {
                warn!(line = number + 1, "skipping malformed instruction: {}", line.trim());
            }
            Err(UnknownOpcode) => {
                trace!(line = number + 1, "skipping unknown opcode: {}", tokens[0]);
            }
        }
    }
    program
}

enum ParseFailure {
    UnknownOpcode,
    Malformed,
}
use ParseFailure::{Malformed, UnknownOpcode};

fn parse_instruction(tokens: &[&str]) -> Result<Instruction, ParseFailure> {
    let id = |token: &str| token.to_string();
    match *tokens {
        ["INPUT", owner, name] => owner
            .parse()
            .map(|owner| Instruction::Input { owner, id: id(name) })
            .map_err(|_| Malformed),
        ["ADD", a, b, c] => Ok(Instruction::Add {
            a: id(a),
            b: id(b),
            c: id(c),
        }),
        ["MULTIPLY", a, b, c] => Ok(Instruction::Multiply {
            a: id(a),
            b: id(b),
            c: id(c),
        }),
        ["SCALE", factor, a, c] => factor
            .parse()
            .map(|factor| Instruction::Scale {
                factor,
                a: id(a),
                c: id(c),
            })
            .map_err(|_| Malformed),
        ["ADD_CONSTANT", constant, a, c] => constant
            .parse()
            .map(|constant| Instruction::AddConstant {
                constant,
                a: id(a),
                c: id(c),
            })
            .map_err(|_| Malformed),
        ["OPEN", name] => Ok(Instruction::Open { id: id(name) }),
        ["OUTPUT", name] => Ok(Instruction::Output { id: id(name) }),
        ["RANDOM_BIT", name] => Ok(Instruction::RandomBit { id: id(name) }),
        ["INPUT", ..] | ["ADD", ..] | ["MULTIPLY", ..] | ["SCALE", ..]
        | ["ADD_CONSTANT", ..] | ["OPEN", ..] | ["OUTPUT", ..] | ["RANDOM_BIT", ..] => {
            Err(Malformed)
        }
        _ => Err(UnknownOpcode),
    }
}

/// Parse `<id> = <decimal>` input lines. Malformed lines are skipped with a
/// diagnostic.
pub fn parse_inputs(source: &str) -> HashMap<String, BigUint> {
    let mut inputs = HashMap::new();
    for line in source.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed = line.split_once('=').and_then(|(id, value)| {
            let id = id.trim();
            let value = value.trim().parse::<BigUint>().ok()?;
            (!id.is_empty()).then(|| (id.to_string(), value))
        });
        match parsed {
            Some((id, value)) => {
                inputs.insert(id, value);
            }
            None => warn!("could not parse input line: {}", line.trim()),
        }
    }
    inputs
}

/// Execute a program against the engine, returning reconstructed values for
/// every OUTPUT instruction.
///
/// A missing input value is fatal: sharing nothing would stall every peer
/// blocked on the identifier.
pub async fn execute(
    engine: &PartyEngine,
    program: &[Instruction],
    inputs: &HashMap<String, BigUint>,
) -> Result<BTreeMap<String, BigUint>, EngineError> {
    let mut outputs = BTreeMap::new();
    for instruction in program {
        match instruction {
            Instruction::Input { owner, id } => {
                if *owner != engine.index() {
                    continue;
                }
                let value = inputs
                    .get(id)
                    .ok_or_else(|| EngineError::InputMissing(id.clone()))?;
                engine.input(value, id);
            }
            Instruction::Add { a, b, c } => engine.add(a, b, c).await?,
            Instruction::Multiply { a, b, c } => engine.multiply(a, b, c).await?,
            Instruction::Scale { factor, a, c } => engine.scale(factor, a, c).await?,
            Instruction::AddConstant { constant, a, c } => {
                engine.add_constant(constant, a, c).await?
            }
            Instruction::Open { id } => engine.open(id).await,
            Instruction::Output { id } => {
                outputs.insert(id.clone(), engine.reconstruct(id).await?);
            }
            Instruction::RandomBit { id } => engine.random_bit(id).await?,
        }
    }
    Ok(outputs)
}
