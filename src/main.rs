//! Punto de entrada ("driver").
//!
//! Este módulo lee las unidades de compilación indicadas, compila cada
//! una de forma independiente y concatena las instrucciones resultantes
//! en un solo flujo de salida.

use anyhow::{bail, Context};
use bitflags::bitflags;
use clap::{crate_version, Arg, Command};
use jackc::{error::Diagnostics, lex::Lexer, source};

use std::{
    ffi::OsStr,
    fs::{self, File},
    io::{self, BufWriter, Read, Write},
    path::Path,
    thread,
};

bitflags! {
    /// Información de depuración que se vuelca a stderr.
    struct Dump: u8 {
        const TOKENS = 0b01;
        const SYMBOLS = 0b10;
    }
}

/// Una unidad de compilación ya leída.
struct Input {
    name: String,
    class: Option<String>,
    text: String,
}

/// Resultado de compilar una unidad.
struct Outcome {
    code: Vec<u8>,
    report: String,
    failed: bool,
}

fn main() -> anyhow::Result<()> {
    // Parsing de CLI
    let args = Command::new("Jack compiler")
        .version(crate_version!())
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .takes_value(true)
                .value_name("FILE")
                .help("Output file, stdout if absent"),
        )
        .arg(
            Arg::new("tokens")
                .long("tokens")
                .help("Dump the token stream of each input to stderr"),
        )
        .arg(
            Arg::new("symbols")
                .long("symbols")
                .help("Dump the class-level symbols of each input to stderr"),
        )
        .arg(
            Arg::new("input")
                .required(true)
                .multiple_values(true)
                .value_name("INPUT")
                .help("Source files, one class each ('-' for stdin)"),
        )
        .get_matches();

    let mut dump = Dump::empty();
    if args.is_present("tokens") {
        dump |= Dump::TOKENS;
    }

    if args.is_present("symbols") {
        dump |= Dump::SYMBOLS;
    }

    let inputs = args
        .values_of("input")
        .into_iter()
        .flatten()
        .map(Input::load)
        .collect::<anyhow::Result<Vec<_>>>()?;

    // Cada unidad tiene su propio compilador; no hay estado compartido
    let outcomes: Vec<Outcome> = thread::scope(|scope| {
        let workers: Vec<_> = inputs
            .iter()
            .map(|input| scope.spawn(move || input.compile(dump)))
            .collect();

        workers
            .into_iter()
            .map(|worker| {
                worker.join().unwrap_or_else(|_| Outcome {
                    code: Vec::new(),
                    report: String::from("error: compiler thread panicked\n"),
                    failed: true,
                })
            })
            .collect()
    });

    let mut failures = 0;
    for outcome in &outcomes {
        eprint!("{}", outcome.report);
        if outcome.failed {
            failures += 1;
        }
    }

    if failures > 0 {
        bail!("{} of {} compilation units failed", failures, outcomes.len());
    }

    match args.value_of("output") {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to open for writing: {}", path))?;

            write_all(&outcomes, BufWriter::new(file))
                .with_context(|| format!("Failed to emit to file: {}", path))
        }

        None => write_all(&outcomes, io::stdout().lock()).context("Failed to emit to stdout"),
    }
}

fn write_all<W: Write>(outcomes: &[Outcome], mut output: W) -> io::Result<()> {
    for outcome in outcomes {
        output.write_all(&outcome.code)?;
    }

    output.flush()
}

impl Input {
    fn load(path: &str) -> anyhow::Result<Input> {
        if path == "-" {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read from stdin")?;

            return Ok(Input {
                name: String::from("<stdin>"),
                class: None,
                text,
            });
        }

        let text =
            fs::read_to_string(path).with_context(|| format!("Failed to read: {}", path))?;

        // El nombre de la clase es el del archivo, sin extensión
        let class = Path::new(path)
            .file_stem()
            .and_then(OsStr::to_str)
            .map(String::from);

        Ok(Input {
            name: path.to_owned(),
            class,
            text,
        })
    }

    fn compile(&self, dump: Dump) -> Outcome {
        let mut report = String::new();
        if dump.contains(Dump::TOKENS) {
            self.dump_tokens(&mut report);
        }

        let mut code = Vec::new();
        let result = jackc::compile(
            self.text.as_bytes(),
            &self.name,
            self.class.as_deref(),
            &mut code,
        );

        match result {
            Ok(class) => {
                if dump.contains(Dump::SYMBOLS) {
                    report.push_str(&format!("Symbols of class {}:\n{}", class.name, class.class_scope));
                }

                Outcome {
                    code,
                    report,
                    failed: false,
                }
            }

            Err(error) => {
                let kind = error.val().kind();
                report.push_str(&Diagnostics::from(error).kind(kind).to_string());

                Outcome {
                    code: Vec::new(),
                    report,
                    failed: true,
                }
            }
        }
    }

    /// Escanea de nuevo la entrada desde el inicio. Los errores léxicos
    /// se omiten aquí, ya que la compilación los reporta.
    fn dump_tokens(&self, report: &mut String) {
        let (start, stream) = source::consume(self.text.as_bytes(), self.name.as_str());
        for token in Lexer::new(start, stream).map_while(Result::ok) {
            report.push_str(&format!("{}: {}\n", token.location(), token.val()));
        }
    }
}
