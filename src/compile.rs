//! Análisis sintáctico y generación de código en una sola pasada.
//!
//! El [`Compiler`] es un parser descendente recursivo que consume el flujo
//! de tokens con un solo token de lookahead. Conforme reconoce cada
//! construcción resuelve nombres contra las tablas de símbolos y emite
//! inmediatamente las instrucciones correspondientes por medio de un
//! [`VmWriter`]. No se construye un árbol sintáctico intermedio.
//!
//! Cualquier error es fatal para la unidad de compilación: no se intenta
//! recuperación a nivel de sentencia.

use std::{
    fmt::{self, Display},
    io::Write,
};

use thiserror::Error;

use crate::{
    lex::{Identifier, Keyword, LexError, Symbol, Token, TokenStream},
    source::{Located, Location},
    symbols::{Kind, Scopes, SymbolError, SymbolTable, Type},
    vm::{ArithmeticOp, Emit, EmitError, Segment, VmWriter},
};

/// Anidamiento máximo de términos dentro de una expresión.
pub const MAX_NESTING: u32 = 128;

/// Construcción que el parser esperaba encontrar.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expected {
    Token(Token),
    Identifier,
    Type,
    ReturnType,
    Term,
    Call,
    EndOfInput,
}

impl Display for Expected {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expected::Token(token) => Display::fmt(token, fmt),
            Expected::Identifier => fmt.write_str("an identifier"),
            Expected::Type => fmt.write_str("a type"),
            Expected::ReturnType => fmt.write_str("a type or `void`"),
            Expected::Term => fmt.write_str("an expression"),
            Expected::Call => fmt.write_str("`.` or `(` in subroutine call"),
            Expected::EndOfInput => fmt.write_str("end of input"),
        }
    }
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CompileError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("Expected {expected}, found {found} instead")]
    Syntax { expected: Expected, found: Token },

    #[error("Expected {0}, reached end of input instead")]
    UnexpectedEof(Expected),

    #[error(transparent)]
    Symbol(#[from] SymbolError),

    #[error("Symbol `{0}` is undefined")]
    Unresolved(Identifier),

    #[error("Class `{found}` must be named `{expected}` to match its compilation unit")]
    ClassName { expected: String, found: Identifier },

    #[error("Expression nested deeper than {MAX_NESTING} levels")]
    TooDeep,

    #[error("Subroutine `{0}` is not void and must return a value")]
    MissingReturnValue(String),

    #[error(transparent)]
    Emit(#[from] EmitError),
}

impl CompileError {
    /// Fase a la que se atribuye el error, para diagnósticos.
    pub fn kind(&self) -> &'static str {
        match self {
            CompileError::Lex(_) => "Lexical error",
            CompileError::Syntax { .. } | CompileError::UnexpectedEof(_) | CompileError::TooDeep => {
                "Syntax error"
            }

            CompileError::Emit(_) => "Emission error",
            _ => "Semantic error",
        }
    }
}

pub type Compile<T> = Result<T, Located<CompileError>>;

/// Una subrutina ya emitida.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub locals: u16,
}

/// Resultado de compilar exitosamente una clase.
#[derive(Debug)]
pub struct CompiledClass {
    pub name: Identifier,
    pub class_scope: SymbolTable,
    pub functions: Vec<Function>,
}

/// Forma de un término, decidida por su primer token.
enum Term {
    Integer(u16),
    String(String),
    True,
    False,
    Null,
    This,
    Parenthesized,
    Unary(ArithmeticOp),
    Name(Located<Identifier>),
}

/// Operador binario. Todos comparten precedencia y asocian a la izquierda.
#[derive(Copy, Clone)]
enum Operator {
    Primitive(ArithmeticOp),
    Library(&'static str),
}

/// Subrutina en compilación.
struct Subroutine {
    name: String,
    returns: Type,
}

/// Motor de compilación para una clase.
///
/// Es dueño exclusivo de ambos alcances de símbolos, del contador de
/// etiquetas y del flujo de salida. Instancias distintas no comparten
/// estado alguno.
pub struct Compiler<I: TokenStream, W: Write> {
    tokens: I,
    current: Option<Located<Token>>,
    last_known: Location,
    vm: VmWriter<W>,
    scopes: Scopes,
    labels: u32,
    nesting: u32,
    class_name: Identifier,
    expected_class: Option<String>,
    subroutine: Option<Subroutine>,
    functions: Vec<Function>,
}

impl<I: TokenStream, W: Write> Compiler<I, W> {
    /// Crea un compilador. `start` es la ubicación que se reporta si la
    /// entrada termina antes del primer token.
    pub fn new(start: Location, tokens: I, output: W) -> Self {
        Compiler {
            tokens,
            current: None,
            last_known: start,
            vm: VmWriter::new(output),
            scopes: Scopes::new(),
            labels: 0,
            nesting: 0,
            class_name: Identifier::new(""),
            expected_class: None,
            subroutine: None,
            functions: Vec::new(),
        }
    }

    /// Exige que la clase declarada tenga este nombre.
    pub fn expect_class<S: Into<String>>(mut self, name: S) -> Self {
        self.expected_class = Some(name.into());
        self
    }

    /// `class` Name `{` classVarDec* subroutineDec* `}`
    pub fn compile_class(mut self) -> Compile<CompiledClass> {
        self.advance()?;

        self.expect(Keyword::Class)?;
        let name = self.identifier()?;

        if let Some(expected) = &self.expected_class {
            if name.val().as_ref() != expected {
                let (location, found) = name.split();
                let error = CompileError::ClassName {
                    expected: expected.clone(),
                    found,
                };

                return Err(Located::at(error, location));
            }
        }

        self.class_name = name.into_inner();
        self.expect(Symbol::OpenCurly)?;

        while let Some(keyword @ (Keyword::Static | Keyword::Field)) = self.keyword() {
            self.class_var_dec(keyword)?;
        }

        while let Some(keyword @ (Keyword::Constructor | Keyword::Function | Keyword::Method)) =
            self.keyword()
        {
            self.subroutine_dec(keyword)?;
        }

        self.expect(Symbol::CloseCurly)?;
        if self.current.is_some() {
            return self.fail(Expected::EndOfInput);
        }

        Ok(CompiledClass {
            name: self.class_name,
            class_scope: self.scopes.into_class(),
            functions: self.functions,
        })
    }

    fn class_var_dec(&mut self, keyword: Keyword) -> Compile<()> {
        self.advance()?;

        let kind = match keyword {
            Keyword::Static => Kind::Static,
            _ => Kind::Field,
        };

        let typ = self.typ(false)?;
        self.var_names(typ, kind)?;
        self.expect(Symbol::Semicolon)
    }

    fn subroutine_dec(&mut self, keyword: Keyword) -> Compile<()> {
        self.advance()?;

        let returns = self.typ(true)?;
        let name = self.identifier()?;
        let qualified = format!("{}.{}", self.class_name, name.val());
        self.define(name, returns.clone(), Kind::None)?;

        self.scopes.enter_subroutine();
        if keyword == Keyword::Method {
            let this = Located::at(Identifier::new("this"), self.last_known.clone());
            self.define(this, Type::Class(self.class_name.clone()), Kind::Argument)?;
        }

        self.expect(Symbol::OpenParen)?;
        self.parameter_list()?;
        self.expect(Symbol::CloseParen)?;

        self.expect(Symbol::OpenCurly)?;
        while self.keyword() == Some(Keyword::Var) {
            self.var_dec()?;
        }

        let locals = self.scopes.subroutine().count(Kind::Local);
        self.emit(|vm| vm.write_function(&qualified, locals))?;

        match keyword {
            Keyword::Constructor => {
                let fields = self.scopes.class().count(Kind::Field);
                self.emit(|vm| {
                    vm.write_push(Segment::Constant, fields)?;
                    vm.write_call("Memory.alloc", 1)?;
                    vm.write_pop(Segment::Pointer, 0)
                })?;
            }

            Keyword::Method => self.emit(|vm| {
                vm.write_push(Segment::Argument, 0)?;
                vm.write_pop(Segment::Pointer, 0)
            })?,

            _ => (),
        }

        self.subroutine = Some(Subroutine {
            name: qualified.clone(),
            returns,
        });

        self.statements()?;
        self.expect(Symbol::CloseCurly)?;

        self.functions.push(Function {
            name: qualified,
            locals,
        });

        Ok(())
    }

    fn parameter_list(&mut self) -> Compile<()> {
        if self.symbol() == Some(Symbol::CloseParen) {
            return Ok(());
        }

        loop {
            let typ = self.typ(false)?;
            let name = self.identifier()?;
            self.define(name, typ, Kind::Argument)?;

            if !self.eat(Symbol::Comma)? {
                break Ok(());
            }
        }
    }

    fn var_dec(&mut self) -> Compile<()> {
        self.expect(Keyword::Var)?;
        let typ = self.typ(false)?;
        self.var_names(typ, Kind::Local)?;
        self.expect(Symbol::Semicolon)
    }

    /// Nombres separados por comas que comparten tipo y categoría.
    fn var_names(&mut self, typ: Type, kind: Kind) -> Compile<()> {
        loop {
            let name = self.identifier()?;
            self.define(name, typ.clone(), kind)?;

            if !self.eat(Symbol::Comma)? {
                break Ok(());
            }
        }
    }

    fn statements(&mut self) -> Compile<()> {
        loop {
            match self.keyword() {
                Some(Keyword::Let) => self.let_statement()?,
                Some(Keyword::If) => self.if_statement()?,
                Some(Keyword::While) => self.while_statement()?,
                Some(Keyword::Do) => self.do_statement()?,
                Some(Keyword::Return) => self.return_statement()?,
                _ => break Ok(()),
            }
        }
    }

    fn block(&mut self) -> Compile<()> {
        self.expect(Symbol::OpenCurly)?;
        self.statements()?;
        self.expect(Symbol::CloseCurly)
    }

    fn let_statement(&mut self) -> Compile<()> {
        self.advance()?;
        let name = self.identifier()?;
        let (segment, index) = self.address(&name)?;

        if self.eat(Symbol::OpenSquare)? {
            self.emit(|vm| vm.write_push(segment, index))?;
            self.expression()?;
            self.expect(Symbol::CloseSquare)?;
            self.emit(|vm| vm.write_arithmetic(ArithmeticOp::Add))?;

            self.expect(Symbol::Equals)?;
            self.expression()?;
            self.expect(Symbol::Semicolon)?;

            // La dirección se fija hasta después de evaluar el lado derecho,
            // que puede haber usado `that` por su cuenta
            self.emit(|vm| {
                vm.write_pop(Segment::Temp, 0)?;
                vm.write_pop(Segment::Pointer, 1)?;
                vm.write_push(Segment::Temp, 0)?;
                vm.write_pop(Segment::That, 0)
            })
        } else {
            self.expect(Symbol::Equals)?;
            self.expression()?;
            self.expect(Symbol::Semicolon)?;

            self.emit(|vm| vm.write_pop(segment, index))
        }
    }

    fn if_statement(&mut self) -> Compile<()> {
        self.advance()?;
        self.condition()?;

        let otherwise = self.fresh_label();
        let end = self.fresh_label();

        self.emit(|vm| vm.write_if(&otherwise))?;
        self.block()?;
        self.emit(|vm| {
            vm.write_goto(&end)?;
            vm.write_label(&otherwise)
        })?;

        if self.eat(Keyword::Else)? {
            self.block()?;
        }

        self.emit(|vm| vm.write_label(&end))
    }

    fn while_statement(&mut self) -> Compile<()> {
        self.advance()?;

        let top = self.fresh_label();
        let end = self.fresh_label();

        self.emit(|vm| vm.write_label(&top))?;
        self.condition()?;
        self.emit(|vm| vm.write_if(&end))?;
        self.block()?;
        self.emit(|vm| {
            vm.write_goto(&top)?;
            vm.write_label(&end)
        })
    }

    /// `(` expression `)`, negada para saltar cuando es falsa.
    fn condition(&mut self) -> Compile<()> {
        self.expect(Symbol::OpenParen)?;
        self.expression()?;
        self.expect(Symbol::CloseParen)?;
        self.emit(|vm| vm.write_arithmetic(ArithmeticOp::Not))
    }

    fn do_statement(&mut self) -> Compile<()> {
        self.advance()?;
        let name = self.identifier()?;
        self.subroutine_call(name)?;
        self.expect(Symbol::Semicolon)?;

        // Toda llamada deja exactamente un valor en la pila
        self.emit(|vm| vm.write_pop(Segment::Temp, 0))
    }

    fn return_statement(&mut self) -> Compile<()> {
        self.advance()?;

        let has_value = self.symbol() != Some(Symbol::Semicolon);
        if has_value {
            self.expression()?;
        }

        let declared_void = match &self.subroutine {
            Some(subroutine) if subroutine.returns != Type::Void && !has_value => {
                let error = CompileError::MissingReturnValue(subroutine.name.clone());
                return Err(Located::at(error, self.last_known.clone()));
            }

            Some(subroutine) => subroutine.returns == Type::Void,
            None => false,
        };

        self.expect(Symbol::Semicolon)?;
        self.emit(|vm| vm.write_return(declared_void && !has_value))
    }

    /// term (op term)*, evaluada estrictamente de izquierda a derecha.
    fn expression(&mut self) -> Compile<()> {
        self.term()?;

        while let Some(operator) = self.operator() {
            self.advance()?;
            self.term()?;

            self.emit(|vm| match operator {
                Operator::Primitive(op) => vm.write_arithmetic(op),
                Operator::Library(function) => vm.write_call(function, 2),
            })?;
        }

        Ok(())
    }

    fn operator(&self) -> Option<Operator> {
        let op = match self.symbol()? {
            Symbol::Plus => ArithmeticOp::Add,
            Symbol::Minus => ArithmeticOp::Sub,
            Symbol::Times => return Some(Operator::Library("Math.multiply")),
            Symbol::Slash => return Some(Operator::Library("Math.divide")),
            Symbol::And => ArithmeticOp::And,
            Symbol::Or => ArithmeticOp::Or,
            Symbol::Less => ArithmeticOp::Lt,
            Symbol::Greater => ArithmeticOp::Gt,
            Symbol::Equals => ArithmeticOp::Eq,
            _ => return None,
        };

        Some(Operator::Primitive(op))
    }

    /// Un término, con límite de anidamiento para no agotar la pila.
    fn term(&mut self) -> Compile<()> {
        if self.nesting >= MAX_NESTING {
            let location = match &self.current {
                Some(token) => token.location().clone(),
                None => self.last_known.clone(),
            };

            return Err(Located::at(CompileError::TooDeep, location));
        }

        self.nesting += 1;
        let result = self.nested_term();
        self.nesting -= 1;

        result
    }

    fn nested_term(&mut self) -> Compile<()> {
        match self.term_start()? {
            Term::Integer(value) => self.emit(|vm| vm.write_push(Segment::Constant, value)),

            Term::String(string) => self.emit(|vm| {
                let length = u16::try_from(string.chars().count()).unwrap_or(u16::MAX);
                vm.write_push(Segment::Constant, length)?;
                vm.write_call("String.new", 1)?;

                for c in string.chars() {
                    let code = u16::try_from(u32::from(c)).unwrap_or(u16::MAX);
                    vm.write_push(Segment::Constant, code)?;
                    vm.write_call("String.appendChar", 2)?;
                }

                Ok(())
            }),

            Term::True => self.emit(|vm| {
                vm.write_push(Segment::Constant, 1)?;
                vm.write_arithmetic(ArithmeticOp::Neg)
            }),

            Term::False | Term::Null => self.emit(|vm| vm.write_push(Segment::Constant, 0)),
            Term::This => self.emit(|vm| vm.write_push(Segment::Pointer, 0)),

            Term::Parenthesized => {
                self.expression()?;
                self.expect(Symbol::CloseParen)
            }

            Term::Unary(op) => {
                self.term()?;
                self.emit(|vm| vm.write_arithmetic(op))
            }

            Term::Name(name) => match self.symbol() {
                Some(Symbol::Period | Symbol::OpenParen) => self.subroutine_call(name),

                Some(Symbol::OpenSquare) => {
                    let (segment, index) = self.address(&name)?;
                    self.advance()?;

                    self.emit(|vm| vm.write_push(segment, index))?;
                    self.expression()?;
                    self.expect(Symbol::CloseSquare)?;

                    self.emit(|vm| {
                        vm.write_arithmetic(ArithmeticOp::Add)?;
                        vm.write_pop(Segment::Pointer, 1)?;
                        vm.write_push(Segment::That, 0)
                    })
                }

                _ => {
                    let (segment, index) = self.address(&name)?;
                    self.emit(|vm| vm.write_push(segment, index))
                }
            },
        }
    }

    /// Clasifica y consume el primer token de un término.
    fn term_start(&mut self) -> Compile<Term> {
        let (location, token) = match &self.current {
            Some(token) => token.clone().split(),
            None => return self.fail(Expected::Term),
        };

        let term = match token {
            Token::IntConstant(value) => Term::Integer(value),
            Token::StrConstant(string) => Term::String(string),
            Token::Keyword(Keyword::True) => Term::True,
            Token::Keyword(Keyword::False) => Term::False,
            Token::Keyword(Keyword::Null) => Term::Null,
            Token::Keyword(Keyword::This) => Term::This,
            Token::Symbol(Symbol::OpenParen) => Term::Parenthesized,
            Token::Symbol(Symbol::Minus) => Term::Unary(ArithmeticOp::Neg),
            Token::Symbol(Symbol::Tilde) => Term::Unary(ArithmeticOp::Not),
            Token::Identifier(id) => Term::Name(Located::at(id, location)),
            _ => return self.fail(Expected::Term),
        };

        self.advance()?;
        Ok(term)
    }

    /// Llamada a subrutina, con `name` ya consumido.
    ///
    /// - `var.f(...)`: método sobre un objeto conocido, que se pasa
    ///   como argumento implícito.
    /// - `Name.f(...)`: función o constructor de un tipo con nombre.
    /// - `f(...)`: método sobre el objeto actual.
    fn subroutine_call(&mut self, name: Located<Identifier>) -> Compile<()> {
        let (target, receivers) = match self.symbol() {
            Some(Symbol::Period) => {
                self.advance()?;
                let member = self.identifier()?;

                let object = self
                    .scopes
                    .resolve(name.val().as_ref())
                    .and_then(|symbol| Some((symbol.address()?, symbol.typ.clone())));

                match object {
                    Some(((segment, index), typ)) => {
                        self.emit(|vm| vm.write_push(segment, index))?;
                        (format!("{}.{}", typ, member.val()), 1)
                    }

                    None => (format!("{}.{}", name.val(), member.val()), 0),
                }
            }

            Some(Symbol::OpenParen) => {
                self.emit(|vm| vm.write_push(Segment::Pointer, 0))?;
                (format!("{}.{}", self.class_name, name.val()), 1)
            }

            _ => return self.fail(Expected::Call),
        };

        self.expect(Symbol::OpenParen)?;
        let arguments = self.expression_list()?;
        self.expect(Symbol::CloseParen)?;

        self.emit(|vm| vm.write_call(&target, arguments.saturating_add(receivers)))
    }

    /// Lista de expresiones separadas por comas, posiblemente vacía.
    fn expression_list(&mut self) -> Compile<u16> {
        if self.symbol() == Some(Symbol::CloseParen) {
            return Ok(0);
        }

        let mut count: u16 = 0;
        loop {
            self.expression()?;
            count = count.saturating_add(1);

            if !self.eat(Symbol::Comma)? {
                break Ok(count);
            }
        }
    }

    fn typ(&mut self, allow_void: bool) -> Compile<Type> {
        let typ = match self.current.as_ref().map(Located::val) {
            Some(Token::Keyword(Keyword::Int)) => Type::Int,
            Some(Token::Keyword(Keyword::Char)) => Type::Char,
            Some(Token::Keyword(Keyword::Boolean)) => Type::Boolean,
            Some(Token::Keyword(Keyword::Void)) if allow_void => Type::Void,
            Some(Token::Identifier(class)) => Type::Class(class.clone()),

            _ if allow_void => return self.fail(Expected::ReturnType),
            _ => return self.fail(Expected::Type),
        };

        self.advance()?;
        Ok(typ)
    }

    /// Declara un nombre en el alcance que corresponde a su categoría.
    fn define(&mut self, name: Located<Identifier>, typ: Type, kind: Kind) -> Compile<()> {
        let (location, name) = name.split();
        let scope = match kind {
            Kind::Argument | Kind::Local => self.scopes.subroutine_mut(),
            Kind::Static | Kind::Field | Kind::None => self.scopes.class_mut(),
        };

        match scope.define(name, typ, kind) {
            Ok(_) => Ok(()),
            Err(error) => Err(Located::at(error.into(), location)),
        }
    }

    /// Segmento e índice de una variable declarada.
    fn address(&self, name: &Located<Identifier>) -> Compile<(Segment, u16)> {
        self.scopes
            .resolve(name.val().as_ref())
            .and_then(|symbol| symbol.address())
            .ok_or_else(|| {
                let error = CompileError::Unresolved(name.val().clone());
                Located::at(error, name.location().clone())
            })
    }

    /// Etiqueta nueva, única dentro de esta clase.
    fn fresh_label(&mut self) -> String {
        let label = format!("L{}", self.labels);
        self.labels += 1;
        label
    }

    fn emit<F>(&mut self, write: F) -> Compile<()>
    where
        F: FnOnce(&mut VmWriter<W>) -> Emit,
    {
        write(&mut self.vm).map_err(|error| Located::at(error.into(), self.last_known.clone()))
    }

    fn keyword(&self) -> Option<Keyword> {
        match self.current.as_ref().map(Located::val) {
            Some(Token::Keyword(keyword)) => Some(*keyword),
            _ => None,
        }
    }

    fn symbol(&self) -> Option<Symbol> {
        match self.current.as_ref().map(Located::val) {
            Some(Token::Symbol(symbol)) => Some(*symbol),
            _ => None,
        }
    }

    fn identifier(&mut self) -> Compile<Located<Identifier>> {
        let id = match &self.current {
            Some(token) => match token.val() {
                Token::Identifier(id) => Located::at(id.clone(), token.location().clone()),
                _ => return self.fail(Expected::Identifier),
            },

            None => return self.fail(Expected::Identifier),
        };

        self.advance()?;
        Ok(id)
    }

    /// Consume el token actual si es `token`.
    fn eat<T: Into<Token>>(&mut self, token: T) -> Compile<bool> {
        let token = token.into();
        if self.current.as_ref().map(Located::val) == Some(&token) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect<T: Into<Token>>(&mut self, token: T) -> Compile<()> {
        let token = token.into();
        if self.eat(token.clone())? {
            Ok(())
        } else {
            self.fail(Expected::Token(token))
        }
    }

    /// Descarta el token actual y carga el siguiente del flujo.
    fn advance(&mut self) -> Compile<()> {
        if let Some(token) = self.current.take() {
            self.last_known = token.split().0;
        }

        self.current = self
            .tokens
            .next()
            .transpose()
            .map_err(|error| error.map(CompileError::from))?;

        Ok(())
    }

    fn fail<T>(&self, expected: Expected) -> Compile<T> {
        let error = match &self.current {
            Some(token) => Located::at(
                CompileError::Syntax {
                    expected,
                    found: token.val().clone(),
                },
                token.location().clone(),
            ),

            None => Located::at(CompileError::UnexpectedEof(expected), self.last_known.clone()),
        };

        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::Lexer, source};

    fn compile(text: &str) -> Compile<String> {
        let (start, stream) = source::consume(text.as_bytes(), "Test.jack");
        let mut output = Vec::new();
        Compiler::new(start.clone(), Lexer::new(start, stream), &mut output).compile_class()?;
        Ok(String::from_utf8(output).unwrap())
    }

    /// Compila el cuerpo de `function void f()` con las variables dadas.
    fn body(vars: &str, statements: &str) -> String {
        let text = format!("class T {{ function void f() {{ {} {} }} }}", vars, statements);
        let output = compile(&text).unwrap();
        let prefix = output.find('\n').unwrap() + 1;
        output[prefix..].to_owned()
    }

    fn error(text: &str) -> CompileError {
        compile(text).unwrap_err().into_inner()
    }

    #[test]
    fn empty_class() {
        assert_eq!(compile("class Empty {}").unwrap(), "");
    }

    #[test]
    fn function_header_counts_locals() {
        let output = compile("class A { function int g(int a) { var int x, y; var char c; return a; } }");
        assert_eq!(
            output.unwrap(),
            "function A.g 3\npush argument 0\nreturn\n"
        );
    }

    #[test]
    fn constructor_allocates_fields() {
        let output = compile(
            "class P { field int x, y; static int n; constructor P new() { return this; } }",
        );

        assert_eq!(
            output.unwrap(),
            "function P.new 0\npush constant 2\ncall Memory.alloc 1\npop pointer 0\n\
             push pointer 0\nreturn\n"
        );
    }

    #[test]
    fn method_arguments_start_at_one() {
        let output = compile("class P { field int x; method void set(int v) { let x = v; return; } }");
        assert_eq!(
            output.unwrap(),
            "function P.set 0\npush argument 0\npop pointer 0\npush argument 1\npop this 0\n\
             push constant 0\nreturn\n"
        );
    }

    #[test]
    fn flat_left_to_right_expressions() {
        assert_eq!(
            body("var int x;", "let x = 1 + 2 * 3;"),
            "push constant 1\npush constant 2\nadd\npush constant 3\ncall Math.multiply 2\n\
             pop local 0\n"
        );

        assert_eq!(
            body("var int x;", "let x = -(x / 2) & ~x;"),
            "push local 0\npush constant 2\ncall Math.divide 2\nneg\npush local 0\nnot\nand\n\
             pop local 0\n"
        );
    }

    #[test]
    fn keyword_constants() {
        assert_eq!(
            body("var boolean b;", "let b = true; let b = false; let b = null;"),
            "push constant 1\nneg\npop local 0\npush constant 0\npop local 0\n\
             push constant 0\npop local 0\n"
        );
    }

    #[test]
    fn array_assignment_fixes_address_last() {
        assert_eq!(
            body("var Array a, b;", "let a[1] = b[2];"),
            "push local 0\npush constant 1\nadd\n\
             push local 1\npush constant 2\nadd\npop pointer 1\npush that 0\n\
             pop temp 0\npop pointer 1\npush temp 0\npop that 0\n"
        );
    }

    #[test]
    fn if_else() {
        assert_eq!(
            body("var int x;", "if (x) { let x = 1; } else { let x = 2; }"),
            "push local 0\nnot\nif-goto L0\npush constant 1\npop local 0\ngoto L1\nlabel L0\n\
             push constant 2\npop local 0\nlabel L1\n"
        );
    }

    #[test]
    fn if_without_else_still_emits_both_labels() {
        assert_eq!(
            body("", "if (true) { }"),
            "push constant 1\nneg\nnot\nif-goto L0\ngoto L1\nlabel L0\nlabel L1\n"
        );
    }

    #[test]
    fn while_loop() {
        assert_eq!(
            body("var int i;", "while (i < 3) { let i = i + 1; }"),
            "label L0\npush local 0\npush constant 3\nlt\nnot\nif-goto L1\n\
             push local 0\npush constant 1\nadd\npop local 0\ngoto L0\nlabel L1\n"
        );
    }

    #[test]
    fn labels_never_repeat() {
        let output = body("", "while (true) { if (false) { } } if (null) { }");
        assert!(output.contains("label L0") && output.contains("label L5"));
        assert!(!output.contains("label L6"));
    }

    #[test]
    fn calls() {
        assert_eq!(
            body("var Foo obj;", "do obj.bar(1); do Foo.bar(); do baz(2, 3);"),
            "push local 0\npush constant 1\ncall Foo.bar 2\npop temp 0\n\
             call Foo.bar 0\npop temp 0\n\
             push pointer 0\npush constant 2\npush constant 3\ncall T.baz 3\npop temp 0\n"
        );
    }

    #[test]
    fn string_literal() {
        assert_eq!(
            body("var String s;", "let s = \"ab\";"),
            "push constant 2\ncall String.new 1\npush constant 97\ncall String.appendChar 2\n\
             push constant 98\ncall String.appendChar 2\npop local 0\n"
        );
    }

    #[test]
    fn fields_and_statics() {
        let output = compile(
            "class C { static int count; field int a; \
             method void m() { let count = a; return; } }",
        );

        assert!(output.unwrap().contains("push this 0\npop static 0\n"));
    }

    #[test]
    fn shadowing() {
        let output = compile(
            "class C { field int x; method int m() { var int x; let x = 1; return x; } }",
        );

        assert!(output.unwrap().contains("push constant 1\npop local 0\npush local 0\nreturn\n"));
    }

    #[test]
    fn syntax_errors() {
        match error("class A { function void f() { let = 1; } }") {
            CompileError::Syntax { expected, found } => {
                assert_eq!(expected, Expected::Identifier);
                assert_eq!(found, Token::Symbol(Symbol::Equals));
            }

            other => panic!("unexpected error {:?}", other),
        }

        assert!(matches!(
            error("class A { function void f() { do f; } }"),
            CompileError::Syntax { expected: Expected::Call, .. }
        ));

        assert!(matches!(
            error("class A { function"),
            CompileError::UnexpectedEof(Expected::ReturnType)
        ));

        assert!(matches!(error("class A { } x"), CompileError::Syntax { expected: Expected::EndOfInput, .. }));
        assert!(matches!(error(""), CompileError::UnexpectedEof(_)));
    }

    #[test]
    fn semantic_errors() {
        assert!(matches!(
            error("class A { function void f() { let y = 1; return; } }"),
            CompileError::Unresolved(_)
        ));

        assert!(matches!(
            error("class A { field int x; static char x; }"),
            CompileError::Symbol(SymbolError::DuplicateName(_))
        ));

        assert!(matches!(
            error("class A { function void f() { return; } method int f() { return 1; } }"),
            CompileError::Symbol(SymbolError::DuplicateName(_))
        ));

        assert!(matches!(
            error("class A { function int f() { return; } }"),
            CompileError::MissingReturnValue(_)
        ));
    }

    #[test]
    fn unencodable_characters_are_protocol_errors() {
        assert!(matches!(
            error("class A { function void f() { do Output.printString(\"\u{1F600}\"); return; } }"),
            CompileError::Emit(EmitError::Protocol(_))
        ));
    }

    #[test]
    fn nesting_is_bounded() {
        let nested = |depth: usize| {
            format!(
                "class A {{ function int f() {{ return {}1{}; }} }}",
                "(".repeat(depth),
                ")".repeat(depth)
            )
        };

        assert!(compile(&nested(100)).is_ok());

        let failure = compile(&nested(2000)).unwrap_err();
        assert!(matches!(failure.val(), CompileError::TooDeep));
        assert_eq!(failure.location().to_string(), "Test.jack:1:165");

        let unary = format!("class A {{ function int f() {{ return {}1; }} }}", "-".repeat(2000));
        assert!(matches!(error(&unary), CompileError::TooDeep));
    }

    #[test]
    fn lexical_errors_abort() {
        assert!(matches!(error("class A { # }"), CompileError::Lex(LexError::BadChar('#'))));
    }

    #[test]
    fn subroutine_scope_is_fresh() {
        let output = compile(
            "class A { function void f(int a) { var int x; return; } \
             function void g() { var int y; let y = 1; return; } }",
        );

        assert!(output.unwrap().contains("function A.g 1\npush constant 1\npop local 0\n"));

        assert!(matches!(
            error("class A { function void f(int a) { return; } function void g() { let a = 1; return; } }"),
            CompileError::Unresolved(_)
        ));
    }

    #[test]
    fn class_name_must_match() {
        let (start, stream) = source::consume("class Other {}".as_bytes(), "Main.jack");
        let mut output = Vec::new();
        let result = Compiler::new(start.clone(), Lexer::new(start, stream), &mut output)
            .expect_class("Main")
            .compile_class();

        assert!(matches!(result.map_err(Located::into_inner), Err(CompileError::ClassName { .. })));
    }
}
