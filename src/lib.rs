use image::{self, DynamicImage, GenericImageView, ImageResult, Rgb, Rgba, RgbaImage};
use itertools::iproduct;
use log::{debug, trace};
use num_bigint::BigInt;
use num_derive::FromPrimitive;
use num_integer::Integer;
use num_traits::{FromPrimitive, One, ToPrimitive, Zero};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

pub mod gen;

pub trait GetAllEqualIterator<T>: Iterator<Item = T> {
    fn get_all_equal(&mut self) -> Option<T>
    where
        Self: Sized,
        Self::Item: PartialEq,
    {
        let a = self.next()?;
        self.all(|x| a == x).then(|| a)
    }
}

impl<T, I: Iterator<Item = T>> GetAllEqualIterator<T> for I {}

pub type Coord = (usize, usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[derive(FromPrimitive)]
pub enum Hue {
    Red = 0,
    Yellow = 1,
    Green = 2,
    Cyan = 3,
    Blue = 4,
    Magenta = 5,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[derive(FromPrimitive)]
pub enum Lightness {
    Light = 0,
    Normal = 1,
    Dark = 2,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Color(Hue, Lightness),
    Black,
    White,
    Other,
}

#[allow(non_upper_case_globals)]
impl Color {
    pub const LightRed: Color = Color::Color(Hue::Red, Lightness::Light);
    pub const LightYellow: Color = Color::Color(Hue::Yellow, Lightness::Light);
    pub const LightGreen: Color = Color::Color(Hue::Green, Lightness::Light);
    pub const LightCyan: Color = Color::Color(Hue::Cyan, Lightness::Light);
    pub const LightBlue: Color = Color::Color(Hue::Blue, Lightness::Light);
    pub const LightMagenta: Color = Color::Color(Hue::Magenta, Lightness::Light);

    pub const Red: Color = Color::Color(Hue::Red, Lightness::Normal);
    pub const Yellow: Color = Color::Color(Hue::Yellow, Lightness::Normal);
    pub const Green: Color = Color::Color(Hue::Green, Lightness::Normal);
    pub const Cyan: Color = Color::Color(Hue::Cyan, Lightness::Normal);
    pub const Blue: Color = Color::Color(Hue::Blue, Lightness::Normal);
    pub const Magenta: Color = Color::Color(Hue::Magenta, Lightness::Normal);

    pub const DarkRed: Color = Color::Color(Hue::Red, Lightness::Dark);
    pub const DarkYellow: Color = Color::Color(Hue::Yellow, Lightness::Dark);
    pub const DarkGreen: Color = Color::Color(Hue::Green, Lightness::Dark);
    pub const DarkCyan: Color = Color::Color(Hue::Cyan, Lightness::Dark);
    pub const DarkBlue: Color = Color::Color(Hue::Blue, Lightness::Dark);
    pub const DarkMagenta: Color = Color::Color(Hue::Magenta, Lightness::Dark);

    /// The 18 colors with a hue and a lightness, light row first.
    pub const CHROMATIC: [Color; 18] = [
        Color::LightRed, Color::LightYellow, Color::LightGreen,
        Color::LightCyan, Color::LightBlue, Color::LightMagenta,
        Color::Red, Color::Yellow, Color::Green,
        Color::Cyan, Color::Blue, Color::Magenta,
        Color::DarkRed, Color::DarkYellow, Color::DarkGreen,
        Color::DarkCyan, Color::DarkBlue, Color::DarkMagenta,
    ];
}

impl Color {
    /// The command executed when the instruction pointer steps from a codel
    /// of this color onto a codel of color `next`. Leaving white executes
    /// nothing; entering white starts a free zone.
    pub fn step_to(self, next: Color) -> Command {
        if self == Color::White {
            return Command::Noop;
        }
        if next == Color::White {
            return Command::FreeZone;
        }
        let (hue, lightness) = match self {
            Color::Color(h, l) => (h, l),
            _ => { panic!(); }
        };
        let (next_hue, next_lightness) = match next {
            Color::Color(h, l) => (h, l),
            _ => { panic!(); }
        };
        let hue_step = (next_hue as i32 - hue as i32).rem_euclid(6);
        let light_step = (next_lightness as i32 - lightness as i32).rem_euclid(3);
        FromPrimitive::from_i32(light_step + hue_step * 3).unwrap()
    }

    /// Reverse of `step_to`: the color a codel must have so that stepping
    /// onto it from a codel of this color executes `command`.
    pub fn next_for_command(self, command: Command) -> Color {
        let (hue, lightness) = match self {
            Color::Color(h, l) => (h as i32, l as i32),
            _ => { panic!(); }
        };
        let command = command as i32;
        assert!(command < 18);
        let dlight = command % 3;
        let dhue = command / 3;
        Color::from_parts((hue + dhue) % 6, (lightness + dlight) % 3).unwrap()
    }

    pub fn from_parts(hue: i32, lightness: i32) -> Option<Color> {
        let hue = Hue::from_i32(hue)?;
        let lightness = Lightness::from_i32(lightness)?;
        Some(Color::Color(hue, lightness))
    }
}

/// The 17 Piet commands plus `Noop`, numbered `hue_step * 3 + lightness_step`,
/// and the two pseudo-commands for white (`FreeZone`) and black (`Edge`)
/// codels, which are never encoded as a color step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[derive(FromPrimitive)]
pub enum Command {
    Noop = 0,
    Push = 1,
    Pop = 2,
    Add = 3,
    Subtract = 4,
    Multiply = 5,
    Divide = 6,
    Mod = 7,
    Not = 8,
    Greater = 9,
    Pointer = 10,
    Switch = 11,
    Duplicate = 12,
    Roll = 13,
    InNum = 14,
    InChar = 15,
    OutNum = 16,
    OutChar = 17,
    FreeZone = 100,
    Edge = 101,
}

impl fmt::Debug for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", match *self {
            Color::LightRed => "LightRed",
            Color::LightYellow => "LightYellow",
            Color::LightGreen => "LightGreen",
            Color::LightCyan => "LightCyan",
            Color::LightBlue => "LightBlue",
            Color::LightMagenta => "LightMagenta",
            Color::Red => "Red",
            Color::Yellow => "Yellow",
            Color::Green => "Green",
            Color::Cyan => "Cyan",
            Color::Blue => "Blue",
            Color::Magenta => "Magenta",
            Color::DarkRed => "DarkRed",
            Color::DarkYellow => "DarkYellow",
            Color::DarkGreen => "DarkGreen",
            Color::DarkCyan => "DarkCyan",
            Color::DarkBlue => "DarkBlue",
            Color::DarkMagenta => "DarkMagenta",
            Color::Black => "Black",
            Color::White => "White",
            Color::Other => "Other",
        })
    }
}

impl FromStr for Color {
    type Err = ();

    fn from_str(name: &str) -> Result<Color, ()> {
        Ok(match name {
            "LIGHT_RED" => Color::LightRed,
            "LIGHT_YELLOW" => Color::LightYellow,
            "LIGHT_GREEN" => Color::LightGreen,
            "LIGHT_CYAN" => Color::LightCyan,
            "LIGHT_BLUE" => Color::LightBlue,
            "LIGHT_MAGENTA" => Color::LightMagenta,
            "RED" => Color::Red,
            "YELLOW" => Color::Yellow,
            "GREEN" => Color::Green,
            "CYAN" => Color::Cyan,
            "BLUE" => Color::Blue,
            "MAGENTA" => Color::Magenta,
            "DARK_RED" => Color::DarkRed,
            "DARK_YELLOW" => Color::DarkYellow,
            "DARK_GREEN" => Color::DarkGreen,
            "DARK_CYAN" => Color::DarkCyan,
            "DARK_BLUE" => Color::DarkBlue,
            "DARK_MAGENTA" => Color::DarkMagenta,
            _ => { return Err(()); }
        })
    }
}

impl From<Rgb<u8>> for Color {
    fn from(pixel: Rgb<u8>) -> Color {
        match pixel {
            Rgb([0xFF, 0xFF, 0xFF]) => Color::White,
            Rgb([0x00, 0x00, 0x00]) => Color::Black,
            Rgb([0xFF, 0xC0, 0xC0]) => Color::LightRed,
            Rgb([0xFF, 0x00, 0x00]) => Color::Red,
            Rgb([0xC0, 0x00, 0x00]) => Color::DarkRed,
            Rgb([0xFF, 0xFF, 0xC0]) => Color::LightYellow,
            Rgb([0xFF, 0xFF, 0x00]) => Color::Yellow,
            Rgb([0xC0, 0xC0, 0x00]) => Color::DarkYellow,
            Rgb([0xC0, 0xFF, 0xC0]) => Color::LightGreen,
            Rgb([0x00, 0xFF, 0x00]) => Color::Green,
            Rgb([0x00, 0xC0, 0x00]) => Color::DarkGreen,
            Rgb([0xC0, 0xFF, 0xFF]) => Color::LightCyan,
            Rgb([0x00, 0xFF, 0xFF]) => Color::Cyan,
            Rgb([0x00, 0xC0, 0xC0]) => Color::DarkCyan,
            Rgb([0xC0, 0xC0, 0xFF]) => Color::LightBlue,
            Rgb([0x00, 0x00, 0xFF]) => Color::Blue,
            Rgb([0x00, 0x00, 0xC0]) => Color::DarkBlue,
            Rgb([0xFF, 0xC0, 0xFF]) => Color::LightMagenta,
            Rgb([0xFF, 0x00, 0xFF]) => Color::Magenta,
            Rgb([0xC0, 0x00, 0xC0]) => Color::DarkMagenta,
            _ => Color::Other,
        }
    }
}

impl TryFrom<Color> for Rgb<u8> {
    type Error = ();

    fn try_from(pixel: Color) -> Result<Rgb<u8>, ()> {
        Ok(match pixel {
            Color::White => Rgb([0xFF, 0xFF, 0xFF]),
            Color::Black => Rgb([0x00, 0x00, 0x00]),
            Color::LightRed => Rgb([0xFF, 0xC0, 0xC0]),
            Color::Red => Rgb([0xFF, 0x00, 0x00]),
            Color::DarkRed => Rgb([0xC0, 0x00, 0x00]),
            Color::LightYellow => Rgb([0xFF, 0xFF, 0xC0]),
            Color::Yellow => Rgb([0xFF, 0xFF, 0x00]),
            Color::DarkYellow => Rgb([0xC0, 0xC0, 0x00]),
            Color::LightGreen => Rgb([0xC0, 0xFF, 0xC0]),
            Color::Green => Rgb([0x00, 0xFF, 0x00]),
            Color::DarkGreen => Rgb([0x00, 0xC0, 0x00]),
            Color::LightCyan => Rgb([0xC0, 0xFF, 0xFF]),
            Color::Cyan => Rgb([0x00, 0xFF, 0xFF]),
            Color::DarkCyan => Rgb([0x00, 0xC0, 0xC0]),
            Color::LightBlue => Rgb([0xC0, 0xC0, 0xFF]),
            Color::Blue => Rgb([0x00, 0x00, 0xFF]),
            Color::DarkBlue => Rgb([0x00, 0x00, 0xC0]),
            Color::LightMagenta => Rgb([0xFF, 0xC0, 0xFF]),
            Color::Magenta => Rgb([0xFF, 0x00, 0xFF]),
            Color::DarkMagenta => Rgb([0xC0, 0x00, 0xC0]),
            Color::Other => { return Err(()); }
        })
    }
}

impl From<Rgba<u8>> for Color {
    fn from(pixel: Rgba<u8>) -> Color {
        let Rgba([r, g, b, a]) = pixel;
        if a != 0xFF {
            return Color::Other;
        }
        Rgb([r, g, b]).into()
    }
}

impl TryFrom<Color> for Rgba<u8> {
    type Error = ();

    fn try_from(pixel: Color) -> Result<Rgba<u8>, ()> {
        let Rgb([r, g, b]) = pixel.try_into()?;
        Ok(Rgba([r, g, b, 0xFF]))
    }
}

/// A Piet program: a rectangular grid of codels, origin top-left.
#[derive(Debug)]
pub struct PietCode {
    pub(crate) width: usize,
    pub(crate) height: usize,
    pub(crate) code: Vec<Color>,
}

impl PietCode {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn codels(&self) -> impl Iterator<Item = (usize, usize, Color)> + '_ {
        self.code.iter().enumerate().map(|(i, c)| {
            let x = i % self.width;
            let y = i / self.width;
            (x, y, *c)
        })
    }

    pub fn at(&self, x: usize, y: usize) -> Option<Color> {
        if x >= self.width || y >= self.height { return None; }
        Some(self.code[x + y * self.width])
    }

    /// Whether the codel at (x, y) shares its color with no four-neighbor,
    /// making it a color block of its own.
    fn lone_codel(&self, x: usize, y: usize) -> bool {
        let color = self.at(x, y);
        [(1, 0), (0, 1), (usize::MAX, 0), (0, usize::MAX)]
            .into_iter()
            .all(|(dx, dy)| self.at(x.wrapping_add(dx), y.wrapping_add(dy)) != color)
    }

    pub fn execute(&self) -> PietRunner<'_> {
        PietRunner::new(self)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[derive(FromPrimitive)]
pub enum Direction {
    Right = 0,
    Down = 1,
    Left = 2,
    Up = 3,
}

impl Direction {
    pub fn to_delta(self) -> Coord {
        match self {
            Direction::Right => (1, 0),
            Direction::Down => (0, 1),
            Direction::Left => (usize::MAX, 0),
            Direction::Up => (0, usize::MAX),
        }
    }

    /// Clockwise rotation by `num` quarter turns; negative rotates
    /// counterclockwise.
    pub fn rotate(self, num: i32) -> Direction {
        FromPrimitive::from_i32((self as i32 + num).rem_euclid(4)).unwrap()
    }
}

#[derive(Debug)]
enum StepError {
    ShortStack { need: usize, have: usize },
    ZeroDivisor,
    RollDepth(BigInt),
    BadCodePoint(BigInt),
    Unsupported(Command),
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use StepError::*;

        match self {
            ShortStack { need, have } => {
                write!(f, "stack holds {have} values but the command needs {need}")
            }
            ZeroDivisor => write!(f, "zero divisor"),
            RollDepth(depth) => write!(f, "bad roll depth {depth}"),
            BadCodePoint(num) => write!(f, "{num} is not a printable code point"),
            Unsupported(command) => write!(f, "{command:?} is not supported"),
        }
    }
}

/// Interpreter for the programs this crate generates, used to check that a
/// grid really prints its message and halts.
///
/// The layouter never paints two same-colored chromatic codels next to each
/// other, so every color block on the executed path is a single codel. That
/// pins down two things the general language leaves open here: a block's
/// push value is always 1, and the codel chooser can never distinguish
/// exits, so none is tracked. The one multi-codel block, the halting block
/// in the grid center, has every exit walled off.
pub struct PietVM {
    dp: Direction,
    pos: Coord,
    stack: Vec<BigInt>,
    output: Vec<u8>,
}

impl Default for PietVM {
    fn default() -> Self {
        PietVM {
            dp: Direction::Right,
            pos: (0, 0),
            stack: Vec::new(),
            output: Vec::new(),
        }
    }
}

impl PietVM {
    fn new() -> Self {
        Self::default()
    }

    /// A lone codel exits through its nearest open side, scanning clockwise
    /// from the travel direction. `None` means every side is walled off.
    fn find_exit(&mut self, code: &PietCode) -> Option<(Coord, Color)> {
        let (x, y) = self.pos;
        for turn in 0..4 {
            let dp = self.dp.rotate(turn);
            let (dx, dy) = dp.to_delta();
            let nx = x.wrapping_add(dx);
            let ny = y.wrapping_add(dy);
            match code.at(nx, ny) {
                None | Some(Color::Black) => {}
                Some(Color::Other) => { panic!(); }
                Some(color) => {
                    self.dp = dp;
                    return Some(((nx, ny), color));
                }
            }
        }
        None
    }

    /// Slide through a free zone one codel at a time, turning clockwise at
    /// walls, until a chromatic codel is reached. Executes nothing. The
    /// (position, direction) set bounds the walk; revisiting a state means
    /// the zone has no way out.
    fn slide(&mut self, code: &PietCode) -> bool {
        let mut seen = HashSet::new();
        while seen.insert((self.pos, self.dp)) {
            let (dx, dy) = self.dp.to_delta();
            let nx = self.pos.0.wrapping_add(dx);
            let ny = self.pos.1.wrapping_add(dy);
            match code.at(nx, ny) {
                Some(Color::White) => { self.pos = (nx, ny); }
                None | Some(Color::Black) => { self.dp = self.dp.rotate(1); }
                Some(Color::Other) => { panic!("invalid color while sliding"); }
                Some(color) => {
                    trace!("(White -> {color:?}) [({nx}, {ny})]");
                    self.pos = (nx, ny);
                    return true;
                }
            }
        }
        false
    }

    fn pop(&mut self) -> Result<BigInt, StepError> {
        self.stack.pop().ok_or(StepError::ShortStack { need: 1, have: 0 })
    }

    fn pop_pair(&mut self) -> Result<(BigInt, BigInt), StepError> {
        let have = self.stack.len();
        if have < 2 {
            return Err(StepError::ShortStack { need: 2, have });
        }
        let b = self.stack.pop().unwrap();
        let a = self.stack.pop().unwrap();
        Ok((a, b))
    }

    fn execute(&mut self, command: Command) -> Result<(), StepError> {
        match command {
            Command::Noop | Command::FreeZone => {}
            Command::Edge => { unreachable!(); }
            Command::Push => {
                // A lone codel's block size is always 1.
                self.stack.push(BigInt::one());
            }
            Command::Pop => { self.pop()?; }
            Command::Add => {
                let (a, b) = self.pop_pair()?;
                self.stack.push(a + b);
            }
            Command::Subtract => {
                let (a, b) = self.pop_pair()?;
                self.stack.push(a - b);
            }
            Command::Multiply => {
                let (a, b) = self.pop_pair()?;
                self.stack.push(a * b);
            }
            Command::Divide => {
                let (a, b) = self.pop_pair()?;
                if b.is_zero() {
                    return Err(StepError::ZeroDivisor);
                }
                self.stack.push(a.div_floor(&b));
            }
            Command::Mod => {
                let (a, b) = self.pop_pair()?;
                if b.is_zero() {
                    return Err(StepError::ZeroDivisor);
                }
                self.stack.push(a.mod_floor(&b));
            }
            Command::Not => {
                let value = self.pop()?;
                self.stack.push(if value.is_zero() { BigInt::one() } else { BigInt::zero() });
            }
            Command::Greater => {
                let (a, b) = self.pop_pair()?;
                self.stack.push(BigInt::from((a > b) as u8));
            }
            Command::Pointer => {
                let turns = self.pop()?;
                let turns = turns.mod_floor(&BigInt::from(4)).to_i32().unwrap();
                self.dp = self.dp.rotate(turns);
            }
            Command::Switch => {
                // With single-codel blocks the chooser can never pick
                // between exits; SWITCH only eats its operand.
                self.pop()?;
            }
            Command::Duplicate => {
                let top = match self.stack.last() {
                    Some(top) => top.clone(),
                    None => { return Err(StepError::ShortStack { need: 1, have: 0 }); }
                };
                self.stack.push(top);
            }
            Command::Roll => {
                let turns = self.pop()?;
                let depth = self.pop()?;
                let depth = depth.to_usize().filter(|&d| d > 0)
                    .ok_or(StepError::RollDepth(depth))?;
                if depth > self.stack.len() {
                    return Err(StepError::ShortStack { need: depth, have: self.stack.len() });
                }
                let turns = turns.mod_floor(&BigInt::from(depth)).to_usize().unwrap();
                let start = self.stack.len() - depth;
                self.stack[start..].rotate_right(turns);
            }
            Command::InNum | Command::InChar | Command::OutNum => {
                return Err(StepError::Unsupported(command));
            }
            Command::OutChar => {
                let value = self.pop()?;
                let byte = value.to_u8().ok_or(StepError::BadCodePoint(value))?;
                self.output.push(byte);
            }
        }
        Ok(())
    }

    pub fn step(&mut self, code: &PietCode) -> bool {
        let (x, y) = self.pos;
        let color = code.at(x, y).unwrap();
        match color {
            Color::White => self.slide(code),
            Color::Color(..) => {
                if !code.lone_codel(x, y) {
                    // Only the halting block is ever larger than one codel.
                    trace!("entered the halting block at ({x}, {y})");
                    return false;
                }
                let Some((pos, next)) = self.find_exit(code) else {
                    return false;
                };
                let command = color.step_to(next);
                trace!("({color:?} -> {next:?}) [{pos:?}] = {command:?} {:?}", self.stack);
                if let Err(err) = self.execute(command) {
                    debug!("skipping {command:?}: {err}");
                }
                self.pos = pos;
                true
            }
            Color::Other => { panic!(); }
            Color::Black => { panic!(); }
        }
    }
}

pub struct PietRunner<'a> {
    code: &'a PietCode,
    vm: PietVM,
}

impl<'a> PietRunner<'a> {
    fn new(code: &'a PietCode) -> Self {
        PietRunner {
            vm: PietVM::new(),
            code,
        }
    }

    pub fn step(&mut self) -> bool {
        self.vm.step(self.code)
    }

    pub fn run(&mut self) {
        while self.step() {}
    }

    /// Run for at most `max_steps` steps. Returns whether the program halted.
    pub fn run_for(&mut self, max_steps: usize) -> bool {
        for _ in 0..max_steps {
            if !self.step() { return true; }
        }
        false
    }

    pub fn output(&self) -> &[u8] {
        &self.vm.output
    }

    pub fn into_output(self) -> Vec<u8> {
        self.vm.output
    }
}

pub fn load(filename: &str, codel_size: u32) -> Result<PietCode, String> {
    let img = image::open(filename).map_err(|e| e.to_string())?;
    to_codels(img, codel_size)
}

pub fn save(code: &PietCode, filename: &str, codel_size: u32) -> ImageResult<()> {
    let img = to_image(code, codel_size);
    img.save(filename)
}

fn to_codels(img: DynamicImage, codel_size: u32) -> Result<PietCode, String> {
    let (w, h) = img.dimensions();
    if w % codel_size != 0 || h % codel_size != 0 {
        return Err("invalid dimensions".to_string());
    }
    let width = w / codel_size;
    let height = h / codel_size;
    let img = img.into_rgba8();
    let code = iproduct!(0..height, 0..width)
        .map(|(y, x)| {
            img.view(x * codel_size, y * codel_size, codel_size, codel_size)
                .pixels()
                .map(|(_, _, px)| px)
                .get_all_equal()
                .map_or(Color::Other, |px| px.into())
        })
        .collect();
    Ok(PietCode {
        width: width as usize,
        height: height as usize,
        code,
    })
}

pub fn to_image(code: &PietCode, codel_size: u32) -> RgbaImage {
    // Unknown codels come out a conspicuous purple.
    const OTHER_COLOR: Rgba<u8> = Rgba([0x73, 0x26, 0xb1, 0xFF]);
    let PietCode { width, height, .. } = code;
    let mut img = RgbaImage::new(
        *width as u32 * codel_size,
        *height as u32 * codel_size,
    );
    for (x, y, codel) in code.codels() {
        let img_x = x as u32 * codel_size;
        let img_y = y as u32 * codel_size;
        let color = codel.try_into().unwrap_or(OTHER_COLOR);

        for dx in 0..codel_size {
            for dy in 0..codel_size {
                img.put_pixel(img_x + dx, img_y + dy, color);
            }
        }
    }
    img
}
