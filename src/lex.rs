//! Análisis léxico.
//!
//! # Tokenization
//! Esta es la primera fase del compilador. Descompone un [`InputStream`]
//! (flujo de caracteres) en unidades léxicas denominadas tokens. Los espacios
//! en blanco y los comentarios (`// ...`, `/* ... */` y `/** ... */`) se
//! descartan durante esta operación. Cada token emitido está asociado a una
//! ubicación en el código fuente original.
//!
//! # Clasificación
//! - Una secuencia maximal de dígitos es una constante entera.
//! - Un texto entre comillas dobles, sin saltos de línea, es una constante
//!   de string.
//! - Una secuencia maximal de letras, dígitos y `_` que no empieza con dígito
//!   es una palabra clave si coincide completa con alguna, o un identificador
//!   en otro caso. Así `doThing` nunca se parte en `do` + `Thing`.
//! - Cualquier otro carácter debe ser uno de los símbolos de un carácter.
//!
//! # Errores
//! A diferencia de otras fases de diagnóstico más tolerantes, el lexer se
//! detiene en el primer error. Luego de reportarlo el flujo termina.

use crate::source::{InputStream, Located, Location};
use std::{
    fmt::{self, Display},
    iter::Peekable,
    rc::Rc,
};

use thiserror::Error;

/// Literal entero máximo, la constante positiva más grande de la máquina.
pub const INT_MAX: u16 = 32767;

/// Error de escaneo.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LexError {
    /// Error de E/S originado por el [`InputStream`].
    #[error("I/O error: {0}")]
    Input(#[from] std::io::Error),

    /// Carácter desconocido o inesperado en el flujo de entrada.
    #[error("Bad character {0:?} in input stream")]
    BadChar(char),

    /// Una constante entera se encuentra fuera de rango.
    #[error("Integer literal overflow, valid range is [0, {INT_MAX}]")]
    IntOverflow,

    /// Una constante de string no se cerró antes del fin de línea.
    #[error("Unterminated string literal")]
    UnterminatedString,

    /// Un comentario de bloque no se cerró antes del fin del archivo.
    #[error("Unterminated block comment")]
    UnterminatedComment,
}

/// Un identificador.
///
/// Los identificadores distinguen mayúsculas de minúsculas. El contenido
/// se comparte por conteo de referencias, ya que el mismo nombre suele
/// viajar del token a la tabla de símbolos y de ahí a errores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(Rc<str>);

impl Identifier {
    /// Construye un identificador sin validar su contenido.
    pub fn new(name: &str) -> Self {
        Identifier(Rc::from(name))
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for Identifier {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Display for Identifier {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(&self.0)
    }
}

lexicon! {
    /// Una palabra clave.
    pub enum Keyword {
        Class => "class",
        Constructor => "constructor",
        Function => "function",
        Method => "method",
        Field => "field",
        Static => "static",
        Var => "var",
        Int => "int",
        Char => "char",
        Boolean => "boolean",
        Void => "void",
        True => "true",
        False => "false",
        Null => "null",
        This => "this",
        Let => "let",
        Do => "do",
        If => "if",
        Else => "else",
        While => "while",
        Return => "return",
    }
}

lexicon! {
    /// Un símbolo de un solo carácter.
    pub enum Symbol {
        OpenCurly => "{",
        CloseCurly => "}",
        OpenParen => "(",
        CloseParen => ")",
        OpenSquare => "[",
        CloseSquare => "]",
        Period => ".",
        Comma => ",",
        Semicolon => ";",
        Plus => "+",
        Minus => "-",
        Times => "*",
        Slash => "/",
        And => "&",
        Or => "|",
        Less => "<",
        Greater => ">",
        Equals => "=",
        Tilde => "~",
    }
}

impl Symbol {
    /// Busca el símbolo que corresponde a un carácter.
    pub fn from_char(c: char) -> Option<Self> {
        Symbol::from_text(c.encode_utf8(&mut [0; 4]))
    }
}

/// Objeto resultante del análisis léxico.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Palabra clave.
    Keyword(Keyword),

    /// Símbolo.
    Symbol(Symbol),

    /// Identificador.
    Identifier(Identifier),

    /// Literal de entero, en `[0, INT_MAX]`.
    IntConstant(u16),

    /// Literal de string, sin sus comillas.
    StrConstant(String),
}

impl Token {
    /// Texto que originó este token.
    ///
    /// Las constantes de string conservan sus comillas. Las constantes
    /// enteras se escriben en forma canónica, sin ceros a la izquierda,
    /// por lo que `007` se reproduce como `7`.
    pub fn literal(&self) -> String {
        match self {
            Token::Keyword(keyword) => keyword.to_string(),
            Token::Symbol(symbol) => symbol.to_string(),
            Token::Identifier(id) => id.to_string(),
            Token::IntConstant(integer) => integer.to_string(),
            Token::StrConstant(string) => format!("\"{}\"", string),
        }
    }
}

impl From<Keyword> for Token {
    fn from(keyword: Keyword) -> Self {
        Token::Keyword(keyword)
    }
}

impl From<Symbol> for Token {
    fn from(symbol: Symbol) -> Self {
        Token::Symbol(symbol)
    }
}

impl Display for Token {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Keyword(keyword) => write!(fmt, "keyword `{}`", keyword),
            Token::Symbol(symbol) => write!(fmt, "`{}`", symbol),
            Token::Identifier(id) => write!(fmt, "identifier `{}`", id),
            Token::IntConstant(integer) => write!(fmt, "literal `{}`", integer),
            Token::StrConstant(string) => write!(fmt, "literal \"{}\"", string),
        }
    }
}

/// Un flujo de tokens tal como lo consume el compilador.
pub trait TokenStream: Iterator<Item = Result<Located<Token>, Located<LexError>>> {}

impl<I> TokenStream for I where I: Iterator<Item = Result<Located<Token>, Located<LexError>>> {}

/// Máquina de estados para análisis léxico.
///
/// La salida del lexer, así como su siguiente estado, se define
/// a partir de tanto su estado actual como el siguiente carácter
/// encontrado en el flujo de entrada. El flujo no es reiniciable:
/// volver a leer los tokens implica escanear de nuevo desde el inicio.
pub struct Lexer<S: Iterator> {
    source: Peekable<S>,
    start: Location,
    last: Location,
    failed: bool,
}

/// Posibles estados del lexer.
enum State {
    /// Estado que ocurre antes de encontrar el inicio de un token.
    Start,

    /// Se encontró `/`, que puede ser división o inicio de comentario.
    Slash,

    /// Comentario de línea, termina en `'\n'`.
    LineComment,

    /// Comentario de bloque.
    BlockComment,

    /// Se encontró `*` dentro de un comentario de bloque.
    BlockStar,

    /// Constante entera, acumulada dígito por dígito.
    Integer(u16),

    /// Término que puede ser un identificador o una palabra clave.
    Word(String),

    /// Contenido de una constante de string.
    Text(String),
}

impl<S: InputStream> Lexer<S> {
    /// Crea un lexer en estado inicial a partir de un flujo.
    pub fn new(start: Location, source: S) -> Self {
        Lexer {
            source: source.peekable(),
            last: start.clone(),
            start,
            failed: false,
        }
    }

    /// Intenta construir un siguiente token.
    fn lex(&mut self) -> Result<Option<Token>, Located<LexError>> {
        use State::*;

        let mut state = Start;
        loop {
            // Se espera un siguiente carácter, fallando si hay error de E/S
            let (next_char, here) = match self.source.peek() {
                None => (None, self.last.clone()),
                Some(Ok((c, location))) => (Some(*c), location.clone()),
                Some(Err(_)) => {
                    let location = self.last.clone();
                    return match self.source.next() {
                        Some(Err(error)) => Err(Located::at(error.into(), location)),
                        _ => Ok(None),
                    };
                }
            };

            // El origen del token se mueve junto al carácter siguiente
            // mientras no se haya encontrado una frontera de token
            if let Start = state {
                self.start = here.clone();
            }

            match (&mut state, next_char) {
                (Start, None) => return Ok(None),
                (Start, Some(c)) if c.is_ascii_whitespace() => (),
                (Start, Some('/')) => state = Slash,
                (Start, Some('"')) => state = Text(String::new()),

                // El carácter no se consume: el estado siguiente se encarga
                (Start, Some(c)) if c.is_ascii_digit() => {
                    state = Integer(0);
                    continue;
                }

                (Start, Some(c)) if c.is_ascii_alphabetic() || c == '_' => {
                    state = Word(String::new());
                    continue;
                }

                (Start, Some(c)) => match Symbol::from_char(c) {
                    Some(symbol) => {
                        self.accept();
                        return Ok(Some(Token::Symbol(symbol)));
                    }

                    None => return Err(Located::at(LexError::BadChar(c), here)),
                },

                (Slash, Some('/')) => state = LineComment,
                (Slash, Some('*')) => state = BlockComment,
                (Slash, _) => return Ok(Some(Token::Symbol(Symbol::Slash))),

                (LineComment, None) => return Ok(None),
                (LineComment, Some('\n')) => state = Start,
                (LineComment, Some(_)) => (),

                (BlockComment, Some('*')) => state = BlockStar,
                (BlockComment, Some(_)) => (),
                (BlockStar, Some('/')) => state = Start,
                (BlockStar, Some('*')) => (),
                (BlockStar, Some(_)) => state = BlockComment,
                (BlockComment | BlockStar, None) => {
                    return Err(Located::at(LexError::UnterminatedComment, self.start.clone()))
                }

                (Integer(accumulated), Some(c)) if c.is_ascii_digit() => {
                    let digit = c as u16 - '0' as u16;

                    match accumulated
                        .checked_mul(10)
                        .and_then(|n| n.checked_add(digit))
                        .filter(|&n| n <= INT_MAX)
                    {
                        Some(result) => *accumulated = result,
                        None => return Err(Located::at(LexError::IntOverflow, self.span(&here))),
                    }
                }

                // Si sigue algo que no es un dígito, la constante ha terminado
                (Integer(integer), _) => return Ok(Some(Token::IntConstant(*integer))),

                (Word(word), Some(c)) if is_word_char(c) => word.push(c),
                (Word(word), _) => {
                    let token = match Keyword::from_text(word) {
                        Some(keyword) => Token::Keyword(keyword),
                        None => Token::Identifier(Identifier::new(word)),
                    };

                    return Ok(Some(token));
                }

                (Text(text), Some('"')) => {
                    let text = std::mem::take(text);
                    self.accept();

                    return Ok(Some(Token::StrConstant(text)));
                }

                (Text(_), None | Some('\n')) => {
                    return Err(Located::at(LexError::UnterminatedString, self.span(&here)))
                }

                (Text(text), Some(c)) => text.push(c),
            }

            // Si no hubo retorno ni `continue`, aquí se consume el carácter
            // que se observó con lookahead anteriormente
            self.accept();
        }
    }

    /// Consume el carácter bajo lookahead.
    fn accept(&mut self) {
        if let Some(Ok((_, location))) = self.source.next() {
            self.last = location;
        }
    }

    /// Rango desde el inicio del token actual hasta `to`.
    fn span(&self, to: &Location) -> Location {
        Location::span(self.start.clone(), to)
    }
}

impl<S: InputStream> Iterator for Lexer<S> {
    type Item = Result<Located<Token>, Located<LexError>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        match self.lex() {
            Ok(None) => None,
            Ok(Some(token)) => {
                let location = Location::span(self.start.clone(), &self.last);
                Some(Ok(Located::at(token, location)))
            }

            Err(error) => {
                self.failed = true;
                Some(Err(error))
            }
        }
    }
}

/// Determina si un carácter puede pertenecer a un término.
fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source;

    fn lex(text: &str) -> Result<Vec<Token>, LexError> {
        let (start, stream) = source::consume(text.as_bytes(), "test");
        Lexer::new(start, stream)
            .map(|result| result.map(Located::into_inner).map_err(Located::into_inner))
            .collect()
    }

    fn id(name: &str) -> Token {
        Token::Identifier(Identifier::new(name))
    }

    #[test]
    fn empty() {
        assert!(lex("").unwrap().is_empty());
        assert!(lex("  \n\t // nothing\n/* at all */").unwrap().is_empty());
    }

    #[test]
    fn classification() {
        let tokens = lex("let x = 42; do Output.printString(\"hi there\");").unwrap();
        assert_eq!(
            tokens,
            vec![
                Keyword::Let.into(),
                id("x"),
                Symbol::Equals.into(),
                Token::IntConstant(42),
                Symbol::Semicolon.into(),
                Keyword::Do.into(),
                id("Output"),
                Symbol::Period.into(),
                id("printString"),
                Symbol::OpenParen.into(),
                Token::StrConstant(String::from("hi there")),
                Symbol::CloseParen.into(),
                Symbol::Semicolon.into(),
            ]
        );
    }

    #[test]
    fn keywords_do_not_split_identifiers() {
        assert_eq!(lex("doThing").unwrap(), vec![id("doThing")]);
        assert_eq!(lex("iffy classy _this").unwrap(), vec![id("iffy"), id("classy"), id("_this")]);
        assert_eq!(lex("do Thing").unwrap(), vec![Keyword::Do.into(), id("Thing")]);
    }

    #[test]
    fn comments_and_division() {
        let tokens = lex("a / b // c\n/** doc\n * more */ d /* x ** y */ e").unwrap();
        assert_eq!(tokens, vec![id("a"), Symbol::Slash.into(), id("b"), id("d"), id("e")]);
    }

    #[test]
    fn digits_then_word() {
        assert_eq!(lex("12ab").unwrap(), vec![Token::IntConstant(12), id("ab")]);
    }

    #[test]
    fn integer_range() {
        assert_eq!(lex("32767").unwrap(), vec![Token::IntConstant(32767)]);
        assert!(matches!(lex("32768"), Err(LexError::IntOverflow)));
        assert!(matches!(lex("99999999"), Err(LexError::IntOverflow)));
    }

    #[test]
    fn bad_input() {
        assert!(matches!(lex("x = #;"), Err(LexError::BadChar('#'))));
        assert!(matches!(lex("\"open\nstring\""), Err(LexError::UnterminatedString)));
        assert!(matches!(lex("\"open"), Err(LexError::UnterminatedString)));
        assert!(matches!(lex("/* never closed"), Err(LexError::UnterminatedComment)));
    }

    #[test]
    fn literal_keeps_quotes() {
        let tokens = lex("\"ab\" 7 while").unwrap();
        let literals: Vec<_> = tokens.iter().map(Token::literal).collect();
        assert_eq!(literals, ["\"ab\"", "7", "while"]);

        let zeros = lex("007 0").unwrap();
        assert_eq!(zeros, vec![Token::IntConstant(7), Token::IntConstant(0)]);
        assert_eq!(zeros[0].literal(), "7");
    }

    #[test]
    fn crlf_is_whitespace() {
        assert_eq!(lex("let\r\nx").unwrap(), vec![Keyword::Let.into(), id("x")]);
        assert_eq!(lex("// note\r\nx\r\n").unwrap(), vec![id("x")]);
    }

    #[test]
    fn unterminated_comment_points_at_opening() {
        let (start, stream) = source::consume("class T {\n  /* open\n more\n".as_bytes(), "T.jack");
        let error = Lexer::new(start, stream).find_map(Result::err).unwrap();

        assert!(matches!(error.val(), LexError::UnterminatedComment));
        assert_eq!(error.location().to_string(), "T.jack:2:3");
    }

    #[test]
    fn locations() {
        let (start, stream) = source::consume("class Main {\n  field int x;\n}".as_bytes(), "Main.jack");
        let tokens: Vec<_> = Lexer::new(start, stream).collect::<Result<_, _>>().unwrap();

        assert_eq!(tokens[0].location().to_string(), "Main.jack:[1:1-1:5]");
        assert_eq!(tokens[2].location().to_string(), "Main.jack:1:12");
        assert_eq!(tokens[3].location().to_string(), "Main.jack:[2:3-2:7]");
    }

    #[test]
    fn stops_after_first_error() {
        let (start, stream) = source::consume("$ x".as_bytes(), "test");
        let mut lexer = Lexer::new(start, stream);
        assert!(matches!(lexer.next(), Some(Err(_))));
        assert!(lexer.next().is_none());
    }
}
