//! Emisión de instrucciones para la máquina de pila.
//!
//! La salida del compilador es texto orientado a líneas: una instrucción
//! por línea, con sus operandos separados por espacios. Este módulo modela
//! ese formato como [`Instruction`], lo valida y lo serializa por medio de
//! [`VmWriter`]. Ninguna instrucción inválida llega a escribirse; el error
//! se reporta a quien la intentó emitir.

use std::{
    fmt::{self, Display},
    io::{self, Write},
    str::FromStr,
};

use thiserror::Error;

use crate::lex::INT_MAX;

/// Índice máximo en el segmento `pointer`.
const POINTER_MAX: u16 = 1;

/// Índice máximo en el segmento `temp`.
const TEMP_MAX: u16 = 7;

lexicon! {
    /// Región direccionable de la memoria de la máquina.
    pub enum Segment {
        Constant => "constant",
        Argument => "argument",
        Local => "local",
        Static => "static",
        This => "this",
        That => "that",
        Pointer => "pointer",
        Temp => "temp",
    }
}

lexicon! {
    /// Operación aritmética o lógica sobre el tope de la pila.
    pub enum ArithmeticOp {
        Add => "add",
        Sub => "sub",
        Neg => "neg",
        Eq => "eq",
        Gt => "gt",
        Lt => "lt",
        And => "and",
        Or => "or",
        Not => "not",
    }
}

impl FromStr for Segment {
    type Err = ProtocolError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        Segment::from_text(string).ok_or_else(|| ProtocolError::UnknownSegment(string.to_owned()))
    }
}

impl FromStr for ArithmeticOp {
    type Err = ProtocolError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        ArithmeticOp::from_text(string).ok_or_else(|| ProtocolError::UnknownCommand(string.to_owned()))
    }
}

/// Intento de emitir o leer una instrucción estructuralmente inválida.
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown command `{0}`")]
    UnknownCommand(String),

    #[error("Unknown segment `{0}`")]
    UnknownSegment(String),

    #[error("Bad index or count `{0}`, expected a non-negative integer")]
    BadIndex(String),

    #[error("`{command}` expects {expected} operand(s), found {found}")]
    Arity {
        command: String,
        expected: usize,
        found: usize,
    },

    #[error("Cannot pop into the constant segment")]
    PopConstant,

    #[error("Constant {0} out of range, valid range is [0, {INT_MAX}]")]
    ConstantRange(u16),

    #[error("Index {index} out of bounds for segment `{segment}`, maximum is {max}")]
    OutOfBounds { segment: Segment, index: u16, max: u16 },

    #[error("Invalid label or function name `{0}`")]
    BadName(String),
}

/// Falla de emisión.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum EmitError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

pub type Emit = Result<(), EmitError>;

/// Una línea del formato de salida.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    Push(Segment, u16),
    Pop(Segment, u16),
    Arithmetic(ArithmeticOp),
    Label(String),
    Goto(String),
    IfGoto(String),
    Call(String, u16),
    Function(String, u16),
    Return,
}

impl Instruction {
    /// Verifica que la instrucción pueda ser interpretada río abajo.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        use Instruction::*;

        match self {
            Push(Segment::Constant, value) if *value > INT_MAX => {
                Err(ProtocolError::ConstantRange(*value))
            }

            Pop(Segment::Constant, _) => Err(ProtocolError::PopConstant),

            Push(segment, index) | Pop(segment, index) => {
                let max = match segment {
                    Segment::Pointer => POINTER_MAX,
                    Segment::Temp => TEMP_MAX,
                    _ => return Ok(()),
                };

                if *index > max {
                    Err(ProtocolError::OutOfBounds {
                        segment: *segment,
                        index: *index,
                        max,
                    })
                } else {
                    Ok(())
                }
            }

            Label(name) | Goto(name) | IfGoto(name) | Call(name, _) | Function(name, _) => {
                if is_symbol_name(name) {
                    Ok(())
                } else {
                    Err(ProtocolError::BadName(name.clone()))
                }
            }

            Arithmetic(_) | Return => Ok(()),
        }
    }
}

impl Display for Instruction {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction::*;

        match self {
            Push(segment, index) => write!(fmt, "push {} {}", segment, index),
            Pop(segment, index) => write!(fmt, "pop {} {}", segment, index),
            Arithmetic(op) => write!(fmt, "{}", op),
            Label(name) => write!(fmt, "label {}", name),
            Goto(name) => write!(fmt, "goto {}", name),
            IfGoto(name) => write!(fmt, "if-goto {}", name),
            Call(name, arguments) => write!(fmt, "call {} {}", name, arguments),
            Function(name, locals) => write!(fmt, "function {} {}", name, locals),
            Return => fmt.write_str("return"),
        }
    }
}

impl FromStr for Instruction {
    type Err = ProtocolError;

    /// Lee una línea del formato de salida, sin su `'\n'`.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let (&command, operands) = words
            .split_first()
            .ok_or_else(|| ProtocolError::UnknownCommand(String::new()))?;

        let arity = |expected: usize| {
            if operands.len() == expected {
                Ok(())
            } else {
                Err(ProtocolError::Arity {
                    command: command.to_owned(),
                    expected,
                    found: operands.len(),
                })
            }
        };

        let instruction = match command {
            "push" | "pop" => {
                arity(2)?;
                let segment = operands[0].parse()?;
                let index = parse_count(operands[1])?;

                if command == "push" {
                    Instruction::Push(segment, index)
                } else {
                    Instruction::Pop(segment, index)
                }
            }

            "label" | "goto" | "if-goto" => {
                arity(1)?;
                let name = operands[0].to_owned();

                match command {
                    "label" => Instruction::Label(name),
                    "goto" => Instruction::Goto(name),
                    _ => Instruction::IfGoto(name),
                }
            }

            "call" | "function" => {
                arity(2)?;
                let name = operands[0].to_owned();
                let count = parse_count(operands[1])?;

                if command == "call" {
                    Instruction::Call(name, count)
                } else {
                    Instruction::Function(name, count)
                }
            }

            "return" => {
                arity(0)?;
                Instruction::Return
            }

            _ => {
                let op = command.parse()?;
                arity(0)?;
                Instruction::Arithmetic(op)
            }
        };

        instruction.validate()?;
        Ok(instruction)
    }
}

/// Serializa instrucciones validadas hacia un flujo de salida.
pub struct VmWriter<W: Write> {
    output: W,
}

impl<W: Write> VmWriter<W> {
    pub fn new(output: W) -> Self {
        VmWriter { output }
    }

    /// Valida y emite una instrucción como una línea.
    pub fn write(&mut self, instruction: &Instruction) -> Emit {
        instruction.validate()?;
        emit!(self, "{}", instruction)?;

        Ok(())
    }

    pub fn write_push(&mut self, segment: Segment, index: u16) -> Emit {
        self.write(&Instruction::Push(segment, index))
    }

    pub fn write_pop(&mut self, segment: Segment, index: u16) -> Emit {
        self.write(&Instruction::Pop(segment, index))
    }

    pub fn write_arithmetic(&mut self, op: ArithmeticOp) -> Emit {
        self.write(&Instruction::Arithmetic(op))
    }

    pub fn write_label(&mut self, label: &str) -> Emit {
        self.write(&Instruction::Label(label.to_owned()))
    }

    pub fn write_goto(&mut self, label: &str) -> Emit {
        self.write(&Instruction::Goto(label.to_owned()))
    }

    pub fn write_if(&mut self, label: &str) -> Emit {
        self.write(&Instruction::IfGoto(label.to_owned()))
    }

    pub fn write_call(&mut self, name: &str, arguments: u16) -> Emit {
        self.write(&Instruction::Call(name.to_owned(), arguments))
    }

    pub fn write_function(&mut self, name: &str, locals: u16) -> Emit {
        self.write(&Instruction::Function(name.to_owned(), locals))
    }

    /// Emite un retorno.
    ///
    /// Toda subrutina deja exactamente un valor en la pila. Si la
    /// subrutina no produce uno, se empuja `0` antes de retornar.
    pub fn write_return(&mut self, is_void: bool) -> Emit {
        if is_void {
            self.write_push(Segment::Constant, 0)?;
        }

        self.write(&Instruction::Return)
    }
}

fn parse_count(text: &str) -> Result<u16, ProtocolError> {
    text.parse()
        .map_err(|_| ProtocolError::BadIndex(text.to_owned()))
}

/// Nombres de etiquetas y funciones: `[A-Za-z_.$:][A-Za-z0-9_.$:]*`.
fn is_symbol_name(name: &str) -> bool {
    let valid = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$' | ':');

    match name.chars().next() {
        None => false,
        Some(first) if first.is_ascii_digit() => false,
        Some(_) => name.chars().all(valid),
    }
}
