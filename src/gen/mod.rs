use crate::{Color, PietCode};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;

mod layout;
mod synth;

/// Knobs for [`generate`]. `seed` pins the layouter's random choices, which
/// otherwise come from entropy; everything else about generation is
/// deterministic.
pub struct GenOptions {
    pub start_color: Color,
    pub abort_color: Color,
    pub seed: Option<u64>,
}

impl Default for GenOptions {
    fn default() -> Self {
        GenOptions {
            start_color: Color::LightRed,
            abort_color: Color::LightGreen,
            seed: None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum GenerateError {
    /// The message contains a character the factor encoding can't reach
    /// (code point 0).
    UnencodableChar { index: usize },
    Internal(String),
}

impl fmt::Display for GenerateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerateError::UnencodableChar { index } => {
                write!(f, "message character {index} can't be encoded")
            }
            GenerateError::Internal(msg) => write!(f, "generate Piet program failed: {msg}"),
        }
    }
}

/// Build a Piet program that prints `message` and halts.
///
/// The codel at the origin gets `options.start_color`, and the halting
/// block in the middle of the grid gets `options.abort_color`.
pub fn generate(message: &str, options: &GenOptions) -> Result<PietCode, GenerateError> {
    let commands = synth::synthesize(message)?;
    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    layout::do_layout(&commands, options.start_color, options.abort_color, &mut rng)
        .map_err(|e| GenerateError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(seed: u64) -> GenOptions {
        GenOptions { seed: Some(seed), ..Default::default() }
    }

    #[test]
    fn test_generate_prints_message() {
        for (seed, message) in [(1, "A"), (2, "Hello World!"), (3, "Merry Christmas!!")] {
            let code = generate(message, &seeded(seed)).unwrap();
            let mut runner = code.execute();
            assert!(runner.run_for(1_000_000), "did not halt for {message:?}");
            assert_eq!(runner.output(), message.as_bytes());
        }
    }

    #[test]
    fn test_generate_custom_colors() {
        let options = GenOptions {
            start_color: Color::Cyan,
            abort_color: Color::DarkMagenta,
            seed: Some(7),
        };
        let code = generate("pietgen", &options).unwrap();
        assert_eq!(code.at(0, 0), Some(Color::Cyan));
        let mut runner = code.execute();
        assert!(runner.run_for(1_000_000));
        assert_eq!(runner.output(), b"pietgen");
    }

    #[test]
    fn test_generate_empty_message() {
        let code = generate("", &seeded(11)).unwrap();
        // Nothing but the abort program and filler: the minimum square.
        assert_eq!(code.width(), 7);
        assert_eq!(code.height(), 7);
        let mut runner = code.execute();
        assert!(runner.run_for(100_000));
        assert_eq!(runner.output(), b"");
    }

    #[test]
    fn test_generate_long_random_message() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(99);
        let message: String = (0..200)
            .map(|_| char::from(rng.gen_range(1..=0xFFu8)))
            .collect();
        let code = generate(&message, &seeded(100)).unwrap();
        let mut runner = code.execute();
        assert!(runner.run_for(10_000_000));
        let expect: Vec<u8> = message.chars().map(|c| c as u32 as u8).collect();
        assert_eq!(runner.output(), &expect[..]);
    }

    #[test]
    fn test_generate_nul_rejected() {
        let err = generate("a\0b", &seeded(1)).unwrap_err();
        assert_eq!(err, GenerateError::UnencodableChar { index: 1 });
    }

    /// Each codel becomes a codel_size x codel_size block of its RGBA color,
    /// and decoding the saved PNG recovers the exact grid.
    #[test]
    fn test_png_round_trip() {
        let code = generate("png", &seeded(8)).unwrap();

        let img = crate::to_image(&code, 3);
        assert_eq!(img.dimensions(), (code.width() as u32 * 3, code.height() as u32 * 3));
        for (x, y, color) in code.codels() {
            let expect: image::Rgba<u8> = color.try_into().unwrap();
            for (dx, dy) in [(0, 0), (1, 2), (2, 1)] {
                assert_eq!(img.get_pixel(x as u32 * 3 + dx, y as u32 * 3 + dy), &expect);
            }
        }

        let path = std::env::temp_dir().join("pietgen_round_trip.png");
        let path = path.to_str().unwrap();
        crate::save(&code, path, 2).unwrap();
        let loaded = crate::load(path, 2).unwrap();
        assert_eq!(
            loaded.codels().collect::<Vec<_>>(),
            code.codels().collect::<Vec<_>>(),
        );

        // The decoded program still runs.
        let mut runner = loaded.execute();
        assert!(runner.run_for(1_000_000));
        assert_eq!(runner.output(), b"png");
    }

    #[test]
    fn test_seed_reproducibility() {
        let a = generate("same seed", &seeded(42)).unwrap();
        let b = generate("same seed", &seeded(42)).unwrap();
        let colors_a: Vec<_> = a.codels().collect();
        let colors_b: Vec<_> = b.codels().collect();
        assert_eq!(colors_a, colors_b);
    }
}
