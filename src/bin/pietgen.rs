use pietgen::gen::{self, GenOptions};
use pietgen::Color;
use std::env;
use std::process::ExitCode;

const EX_USAGE: u8 = 64;
const EX_SOFTWARE: u8 = 70;
const EX_OSERR: u8 = 71;

const USAGE: &str = "usage: pietgen message output_path \
    [--start_color NAME] [--end_color NAME] [--codel_size N] [--seed N]";

struct Args {
    message: String,
    output_path: String,
    codel_size: u32,
    options: GenOptions,
}

fn parse_color(arg: &str) -> Result<Color, String> {
    arg.parse().map_err(|_| format!("unknown color '{arg}'"))
}

fn parse_codel_size(arg: &str) -> Result<u32, String> {
    let err = || format!("argument --codel_size: invalid int value: {arg}");
    let codel_size: i64 = arg.parse().map_err(|_| err())?;
    if codel_size < 1 {
        return Err(err());
    }
    Ok(codel_size as u32)
}

fn next_value(argv: &mut impl Iterator<Item = String>, name: &str) -> Result<String, String> {
    argv.next().ok_or_else(|| format!("argument {name}: expected a value"))
}

fn parse_args(mut argv: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut positional = Vec::new();
    let mut codel_size = 10;
    let mut options = GenOptions::default();

    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "--start_color" => {
                options.start_color = parse_color(&next_value(&mut argv, &arg)?)?;
            }
            "--end_color" => {
                options.abort_color = parse_color(&next_value(&mut argv, &arg)?)?;
            }
            "--codel_size" => {
                codel_size = parse_codel_size(&next_value(&mut argv, &arg)?)?;
            }
            "--seed" => {
                let value = next_value(&mut argv, &arg)?;
                let seed = value.parse()
                    .map_err(|_| format!("argument --seed: invalid int value: {value}"))?;
                options.seed = Some(seed);
            }
            _ if arg.starts_with("--") => {
                return Err(format!("unrecognized argument '{arg}'"));
            }
            _ => { positional.push(arg); }
        }
    }

    let [message, output_path] = <[String; 2]>::try_from(positional)
        .map_err(|_| "expected exactly two arguments: message, output_path".to_string())?;
    if message.contains('\0') {
        return Err("message must not contain NUL".to_string());
    }
    Ok(Args { message, output_path, codel_size, options })
}

fn main() -> ExitCode {
    env_logger::init();

    let args = match parse_args(env::args().skip(1)) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{USAGE}");
            eprintln!("pietgen: error: {msg}");
            return ExitCode::from(EX_USAGE);
        }
    };

    let code = match gen::generate(&args.message, &args.options) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("pietgen: error: {e}");
            return ExitCode::from(EX_SOFTWARE);
        }
    };

    if let Err(e) = pietgen::save(&code, &args.output_path, args.codel_size) {
        eprintln!(
            "pietgen: error: Piet program file create failed. path: '{}': {e}",
            args.output_path,
        );
        return ExitCode::from(EX_OSERR);
    }

    println!("pietgen: Piet program generate succeed. path: '{}'", args.output_path);
    ExitCode::SUCCESS
}
