/// Define un conjunto cerrado de palabras con su representación textual.
///
/// Genera el `enum`, la conversión desde texto y hacia texto, y una
/// implementación de `Display`. Se usa tanto para palabras clave y
/// símbolos del lenguaje fuente como para los segmentos y operaciones
/// de la máquina de pila.
macro_rules! lexicon {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$variant_meta:meta])* $variant:ident => $text:literal,)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($(#[$variant_meta])* $variant,)*
        }

        impl $name {
            /// Todas las variantes, en orden de declaración.
            pub const ALL: &'static [$name] = &[$($name::$variant,)*];

            /// Busca la variante cuyo texto es exactamente `text`.
            pub fn from_text(text: &str) -> Option<Self> {
                match text {
                    $($text => Some($name::$variant),)*
                    _ => None,
                }
            }

            /// Texto original de la variante.
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)*
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, fmt: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                fmt.pad(self.as_str())
            }
        }
    };
}

macro_rules! emit {
    ($writer:expr, $($format:tt)*) => {
        writeln!($writer.output, $($format)*)
    };
}
