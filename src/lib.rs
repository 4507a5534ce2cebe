//! Compilador de un lenguaje orientado a objetos hacia una máquina de pila.
//!
//! # Front end
//! Cada unidad de compilación es una sola clase en un único archivo de
//! código fuente. Este archivo se somete primero a análisis léxico en
//! [`lex`], de lo cual se obtiene un flujo perezoso de tokens.
//!
//! # Generación de código
//! No hay árbol sintáctico ni representación intermedia. El motor en
//! [`compile`] reconoce la gramática por descenso recursivo, resuelve
//! nombres contra las tablas de [`symbols`] y emite instrucciones
//! de la máquina de pila en [`vm`], todo en una sola pasada.
//!
//! # Salida
//! El resultado es texto, una instrucción por línea, que consume un
//! traductor externo. Los errores se reportan con su ubicación original
//! por medio de [`error::Diagnostics`].

#[macro_use]
mod macros;

pub mod compile;
pub mod error;
pub mod lex;
pub mod source;
pub mod symbols;
pub mod vm;

use std::io::{BufRead, Write};

use crate::{
    compile::{Compile, CompiledClass, Compiler},
    lex::Lexer,
};

/// Compila una clase completa desde `reader` hacia `output`.
///
/// `source_name` solo se usa para reportar ubicaciones. Si se indica
/// `class_name`, la clase declarada debe llamarse así.
pub fn compile<R, W>(
    reader: R,
    source_name: &str,
    class_name: Option<&str>,
    output: W,
) -> Compile<CompiledClass>
where
    R: BufRead,
    W: Write,
{
    let (start, stream) = source::consume(reader, source_name);
    let lexer = Lexer::new(start.clone(), stream);

    let mut compiler = Compiler::new(start, lexer, output);
    if let Some(name) = class_name {
        compiler = compiler.expect_class(name);
    }

    compiler.compile_class()
}
