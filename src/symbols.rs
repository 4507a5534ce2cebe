//! Tablas de símbolos.
//!
//! Hay dos alcances con vidas independientes: el de clase, que guarda
//! variables `static` y `field` durante toda la compilación de la clase,
//! y el de subrutina, que guarda argumentos y variables locales y se
//! recrea al inicio de cada subrutina. Cada categoría de almacenamiento
//! lleva su propio contador de índices ordinales.

use std::{
    collections::HashMap,
    fmt::{self, Display},
};

use thiserror::Error;

use crate::{lex::Identifier, vm::Segment};

/// Categoría de almacenamiento de un nombre declarado.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Static,
    Field,
    Argument,
    Local,

    /// Declaración que no ocupa almacenamiento, como el nombre de
    /// una subrutina. Nunca consume un índice ordinal.
    None,
}

impl Kind {
    /// Segmento de la máquina de pila donde vive esta categoría.
    pub fn segment(self) -> Option<Segment> {
        match self {
            Kind::Static => Some(Segment::Static),
            Kind::Field => Some(Segment::This),
            Kind::Argument => Some(Segment::Argument),
            Kind::Local => Some(Segment::Local),
            Kind::None => None,
        }
    }

    fn counter(self) -> Option<usize> {
        match self {
            Kind::Static => Some(0),
            Kind::Field => Some(1),
            Kind::Argument => Some(2),
            Kind::Local => Some(3),
            Kind::None => None,
        }
    }
}

impl Display for Kind {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let string = match self {
            Kind::Static => "static",
            Kind::Field => "field",
            Kind::Argument => "argument",
            Kind::Local => "local",
            Kind::None => "none",
        };

        fmt.pad(string)
    }
}

/// Tipo declarado de una variable o retorno de una subrutina.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    Int,
    Char,
    Boolean,
    Void,
    Class(Identifier),
}

impl Display for Type {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => fmt.write_str("int"),
            Type::Char => fmt.write_str("char"),
            Type::Boolean => fmt.write_str("boolean"),
            Type::Void => fmt.write_str("void"),
            Type::Class(name) => Display::fmt(name, fmt),
        }
    }
}

/// Registro de un nombre declarado.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbol {
    pub name: Identifier,
    pub kind: Kind,
    pub typ: Type,
    pub index: u16,
}

impl Symbol {
    /// Segmento e índice, si el símbolo ocupa almacenamiento.
    pub fn address(&self) -> Option<(Segment, u16)> {
        self.kind.segment().map(|segment| (segment, self.index))
    }
}

#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SymbolError {
    #[error("Redefinition of `{0}` in the same scope")]
    DuplicateName(Identifier),

    #[error("Too many {0} variables")]
    Exhausted(Kind),
}

/// Un alcance: nombres únicos con contadores por categoría.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: HashMap<Identifier, Symbol>,
    counters: [u16; 4],
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declara un nombre, asignándole el siguiente índice de su categoría.
    pub fn define(&mut self, name: Identifier, typ: Type, kind: Kind) -> Result<&Symbol, SymbolError> {
        if self.symbols.contains_key(&name) {
            return Err(SymbolError::DuplicateName(name));
        }

        let index = match kind.counter() {
            None => 0,
            Some(counter) => {
                let index = self.counters[counter];
                self.counters[counter] = index.checked_add(1).ok_or(SymbolError::Exhausted(kind))?;
                index
            }
        };

        let symbol = Symbol {
            name: name.clone(),
            kind,
            typ,
            index,
        };

        Ok(self.symbols.entry(name).or_insert(symbol))
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    /// Cantidad de nombres declarados de una categoría.
    pub fn count(&self, kind: Kind) -> u16 {
        kind.counter().map_or(0, |counter| self.counters[counter])
    }

    /// Olvida todos los nombres y reinicia los cuatro contadores.
    pub fn reset(&mut self) {
        self.symbols.clear();
        self.counters = [0; 4];
    }

    /// Símbolos ordenados por categoría e índice.
    pub fn sorted(&self) -> Vec<&Symbol> {
        let mut symbols: Vec<_> = self.symbols.values().collect();
        symbols.sort_by(|a, b| (a.kind, a.index, &a.name).cmp(&(b.kind, b.index, &b.name)));
        symbols
    }
}

impl Display for SymbolTable {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        for symbol in self.sorted() {
            // Las declaraciones sin almacenamiento no tienen ordinal
            let index = match symbol.address() {
                Some((_, index)) => index.to_string(),
                None => String::from("-"),
            };

            writeln!(
                fmt,
                "{:<8} {:>3}  {:<10} {}",
                symbol.kind,
                index,
                symbol.typ.to_string(),
                symbol.name
            )?;
        }

        Ok(())
    }
}

/// Cadena de alcances: primero el de subrutina, luego el de clase.
#[derive(Debug, Default)]
pub struct Scopes {
    subroutine: SymbolTable,
    class: SymbolTable,
}

impl Scopes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class(&self) -> &SymbolTable {
        &self.class
    }

    pub fn class_mut(&mut self) -> &mut SymbolTable {
        &mut self.class
    }

    pub fn subroutine(&self) -> &SymbolTable {
        &self.subroutine
    }

    pub fn subroutine_mut(&mut self) -> &mut SymbolTable {
        &mut self.subroutine
    }

    /// Descarta el alcance de subrutina anterior y crea uno nuevo.
    pub fn enter_subroutine(&mut self) {
        self.subroutine = SymbolTable::new();
    }

    /// Entrega el alcance de clase, consumiendo la cadena.
    pub fn into_class(self) -> SymbolTable {
        self.class
    }

    /// Busca un nombre de frente a atrás en la cadena.
    ///
    /// Las declaraciones sin almacenamiento no ocultan a nada: solo
    /// se consideran resueltos los nombres con segmento.
    pub fn resolve(&self, name: &str) -> Option<&Symbol> {
        [&self.subroutine, &self.class]
            .into_iter()
            .filter_map(|scope| scope.lookup(name))
            .find(|symbol| symbol.kind != Kind::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> Identifier {
        Identifier::new(name)
    }

    #[test]
    fn ordinals_per_kind() {
        let mut table = SymbolTable::new();
        table.define(id("a"), Type::Int, Kind::Argument).unwrap();
        table.define(id("x"), Type::Int, Kind::Local).unwrap();
        table.define(id("b"), Type::Boolean, Kind::Argument).unwrap();
        table.define(id("run"), Type::Void, Kind::None).unwrap();
        table.define(id("y"), Type::Char, Kind::Local).unwrap();

        assert_eq!(table.lookup("a").unwrap().index, 0);
        assert_eq!(table.lookup("b").unwrap().index, 1);
        assert_eq!(table.lookup("x").unwrap().index, 0);
        assert_eq!(table.lookup("y").unwrap().index, 1);
        assert_eq!(table.count(Kind::Argument), 2);
        assert_eq!(table.count(Kind::Local), 2);
        assert_eq!(table.count(Kind::None), 0);
        assert_eq!(table.lookup("run").unwrap().address(), None);
    }

    #[test]
    fn duplicate_names() {
        let mut table = SymbolTable::new();
        table.define(id("x"), Type::Int, Kind::Field).unwrap();

        let error = table.define(id("x"), Type::Int, Kind::Static).unwrap_err();
        assert_eq!(error, SymbolError::DuplicateName(id("x")));
        assert_eq!(table.count(Kind::Static), 0);
    }

    #[test]
    fn reset_forgets_everything() {
        let mut table = SymbolTable::new();
        for (name, kind) in [("s", Kind::Static), ("f", Kind::Field), ("a", Kind::Argument), ("l", Kind::Local)] {
            table.define(id(name), Type::Int, kind).unwrap();
        }

        table.reset();

        for (name, kind) in [("s", Kind::Static), ("f", Kind::Field), ("a", Kind::Argument), ("l", Kind::Local)] {
            assert!(table.lookup(name).is_none());
            assert_eq!(table.count(kind), 0);
        }

        let symbol = table.define(id("a"), Type::Int, Kind::Argument).unwrap();
        assert_eq!(symbol.index, 0);
    }

    #[test]
    fn subroutine_scope_shadows_class_scope() {
        let mut scopes = Scopes::new();
        scopes.class_mut().define(id("x"), Type::Int, Kind::Field).unwrap();
        scopes.class_mut().define(id("y"), Type::Int, Kind::Static).unwrap();
        scopes.subroutine_mut().define(id("x"), Type::Char, Kind::Local).unwrap();

        assert_eq!(scopes.resolve("x").unwrap().address(), Some((Segment::Local, 0)));
        assert_eq!(scopes.resolve("y").unwrap().address(), Some((Segment::Static, 0)));

        scopes.enter_subroutine();
        assert_eq!(scopes.resolve("x").unwrap().address(), Some((Segment::This, 0)));
    }

    #[test]
    fn dump_marks_declarations_without_storage() {
        let mut table = SymbolTable::new();
        table.define(id("count"), Type::Int, Kind::Static).unwrap();
        table.define(id("p"), Type::Class(id("Point")), Kind::Field).unwrap();
        table.define(id("draw"), Type::Void, Kind::None).unwrap();

        assert_eq!(
            table.to_string(),
            "static     0  int        count\n\
             field      0  Point      p\n\
             none       -  void       draw\n"
        );
    }

    #[test]
    fn subroutine_names_are_not_variables() {
        let mut scopes = Scopes::new();
        scopes.class_mut().define(id("draw"), Type::Void, Kind::None).unwrap();
        assert!(scopes.resolve("draw").is_none());
        assert!(scopes.class().lookup("draw").is_some());
    }
}
