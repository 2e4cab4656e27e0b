use crate::gen::GenerateError;
use crate::Command;
use std::iter::repeat;

/// Divisors used to break character codes into small factors. The
/// +1-then-subtract escape below is only correct when every divisor is
/// prime, so this set is deliberately not configurable.
const DIVISORS: [u32; 2] = [2, 3];

#[derive(Debug, PartialEq, Eq)]
enum Factor {
    Literal(u32),
    Group(Factorization),
}

/// A product of factors, optionally minus one: `2 * (2 * 3 - 1)` is
/// `{ [2, Group { [2, 3], subtract_one }] }`.
#[derive(Debug, PartialEq, Eq, Default)]
struct Factorization {
    factors: Vec<Factor>,
    subtract_one: bool,
}

/// Turn a message into the command sequence that prints it: a leading no-op
/// (so the origin codel can carry the start color), one block per character
/// in reverse message order, then one OUT_CHAR per character.
pub(super) fn synthesize(message: &str) -> Result<Vec<Command>, GenerateError> {
    let chars: Vec<char> = message.chars().collect();
    let mut commands = vec![Command::Noop];
    for (index, &ch) in chars.iter().enumerate().rev() {
        let factorized = factorize(ch as u32)
            .ok_or(GenerateError::UnencodableChar { index })?;
        emit(&factorized, 0, &mut commands);
    }
    commands.extend(repeat(Command::OutChar).take(chars.len()));
    Ok(commands)
}

/// Decompose `value` into a product over `DIVISORS`. A value none of them
/// divide is expressed as the factorization of `value + 1`, minus one.
///
/// ```text
/// factorize(4)  = [2, 2]
/// factorize(5)  = [2, 3] - 1
/// factorize(10) = [2, ([2, 3] - 1)]
/// factorize(21) = [3, ([2, 2, 2] - 1)]
/// ```
fn factorize(value: u32) -> Option<Factorization> {
    if value < 1 {
        return None;
    }
    if value == 1 {
        return Some(Factorization {
            factors: vec![Factor::Literal(1)],
            ..Default::default()
        });
    }

    let mut factors = Vec::new();
    let mut value = value;
    while value > 1 {
        match DIVISORS.iter().find(|&&d| value % d == 0) {
            Some(&d) => {
                factors.push(Factor::Literal(d));
                value /= d;
            }
            None => {
                // value + 1 is even, so the recursion always divides at
                // least once and never carries its own subtract_one.
                let mut inner = factorize(value + 1).unwrap();
                inner.subtract_one = true;
                if factors.is_empty() {
                    return Some(inner);
                }
                factors.push(Factor::Group(inner));
                break;
            }
        }
    }
    Some(Factorization { factors, subtract_one: false })
}

/// Emit stack code evaluating `factorization` in reverse Polish order,
/// leaving a single value on top.
///
/// `prev_pushed` is the integer currently on top of the stack (0 for
/// "nothing reusable"); duplicating and adjusting it is usually shorter
/// than building a literal from scratch.
fn emit(factorization: &Factorization, prev_pushed: u32, commands: &mut Vec<Command>) {
    let mut prev = prev_pushed;
    for factor in &factorization.factors {
        match factor {
            Factor::Group(inner) => {
                emit(inner, prev, commands);
                // The group result is not a literal we can grow or shrink.
                prev = 0;
            }
            &Factor::Literal(value) => {
                if prev == 0 {
                    commands.push(Command::Push);
                    for _ in 1..value {
                        commands.push(Command::Push);
                        commands.push(Command::Add);
                    }
                } else if prev == value {
                    commands.push(Command::Duplicate);
                } else if prev < value {
                    commands.push(Command::Duplicate);
                    for _ in 0..value - prev {
                        commands.push(Command::Push);
                        commands.push(Command::Add);
                    }
                } else {
                    commands.push(Command::Duplicate);
                    for _ in 0..prev - value {
                        commands.push(Command::Push);
                        commands.push(Command::Subtract);
                    }
                }
                prev = value;
            }
        }
    }
    commands.extend(repeat(Command::Multiply).take(factorization.factors.len() - 1));
    if factorization.subtract_one {
        commands.push(Command::Push);
        commands.push(Command::Subtract);
    }
}
