//! Presentación de errores con su ubicación en el código fuente.

use crate::source::{Located, Location};
use std::{
    error::Error,
    fmt::{self, Display},
};

mod sealed {
    pub trait Sealed {}
}

/// Un error que conoce su ubicación original.
pub trait LocatedError: sealed::Sealed {
    fn error(&self) -> &dyn Error;
    fn location(&self) -> &Location;
}

/// Colección de errores lista para ser mostrada al usuario.
pub struct Diagnostics {
    kind: &'static str,
    errors: Vec<Box<dyn 'static + LocatedError>>,
}

impl Diagnostics {
    /// Cambia la etiqueta con que se anuncia cada error.
    pub fn kind(self, kind: &'static str) -> Self {
        Diagnostics { kind, ..self }
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Diagnostics {
            kind: "error",
            errors: Default::default(),
        }
    }
}

impl<E: 'static + LocatedError> From<E> for Diagnostics {
    fn from(error: E) -> Self {
        Diagnostics {
            errors: vec![Box::new(error)],
            ..Default::default()
        }
    }
}

impl Display for Diagnostics {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Diagnostics { kind, errors } = self;

        if errors.is_empty() {
            return writeln!(fmt, "No errors were reported");
        }

        for error in errors {
            writeln!(fmt, "{}: {}", kind, error.error())?;

            let location = error.location();
            writeln!(fmt, " --> {}", location)?;

            let (start, end) = (location.start(), location.end());
            let digits = start.line().to_string().len();

            // Solo se subraya dentro de la primera línea del rango
            let highlight = if end.line() == start.line() {
                end.column().saturating_sub(start.column()).max(1)
            } else {
                1
            };

            let shown = location.with_line(start.line(), |line| {
                writeln!(fmt, "{:digits$} |", "", digits = digits)?;
                writeln!(fmt, "{:>digits$} | {}", start.line(), line, digits = digits)?;
                writeln!(
                    fmt,
                    "{:digits$} | {:skip$}{:^<highlight$}",
                    "",
                    "",
                    "",
                    digits = digits,
                    skip = start.column().saturating_sub(1) as usize,
                    highlight = highlight as usize
                )
            });

            if let Some(result) = shown {
                result?;
            }

            writeln!(fmt)?;
        }

        let error_or_errors = if errors.len() == 1 { "error" } else { "errors" };
        writeln!(
            fmt,
            "Build failed with {} {}",
            errors.len(),
            error_or_errors
        )
    }
}

impl<E: Error> sealed::Sealed for Located<E> {}

impl<E: Error> LocatedError for Located<E> {
    fn error(&self) -> &dyn Error {
        self.as_ref()
    }

    fn location(&self) -> &Location {
        Located::location(self)
    }
}
