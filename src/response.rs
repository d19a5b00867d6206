use crate::config::Positive;
use std::fmt;
use winnow::ascii::{dec_uint, float, newline};
use winnow::combinator::{fail, opt, terminated};
use winnow::error::ContextError;
use winnow::Parser;

/// Tabulated current response of a pixel pad to a unit charge.
///
/// The table is a dense 3D array keyed by the transverse distances between
/// the charge and the pixel center and by the time since the charge arrived
/// at the anode. Lookups use nearest-index rounding; anything outside the
/// tabulated support is zero.
///
/// # Examples
///
/// ```
/// use pixsim::config::Positive;
/// use pixsim::response::ResponseTable;
///
/// let mut table = ResponseTable::new(
///     2,
///     2,
///     4,
///     Positive::new(0.4).unwrap(),
///     Positive::new(0.05).unwrap(),
/// );
/// table.set(0, 0, 1, 1.5);
///
/// assert_eq!(table.value_at(0.1, 0.1, 0.05), 1.5);
/// assert_eq!(table.value_at(0.1, 0.1, 17.0), 0.0);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseTable {
    nx: usize,
    ny: usize,
    nt: usize,
    bin_size: f64,
    time_step: f64,
    data: Vec<f64>,
}

impl ResponseTable {
    /// Creates a table of the given shape filled with zeros.
    pub fn new(
        nx: usize,
        ny: usize,
        nt: usize,
        bin_size: Positive<f64>,
        time_step: Positive<f64>,
    ) -> Self {
        Self {
            nx,
            ny,
            nt,
            bin_size: bin_size.get(),
            time_step: time_step.get(),
            data: vec![0.0; nx * ny * nt],
        }
    }

    /// Returns the `(nx, ny, nt)` shape of the table.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.nx, self.ny, self.nt)
    }

    /// Returns the spatial bin size.
    pub fn bin_size(&self) -> f64 {
        self.bin_size
    }

    /// Returns the time step between consecutive time bins.
    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    /// Stores a value at the given bin.
    ///
    /// # Panics
    ///
    /// Panics if any index is outside the table's shape.
    pub fn set(&mut self, i: usize, j: usize, k: usize, value: f64) {
        assert!(i < self.nx && j < self.ny && k < self.nt);
        self.data[(i * self.ny + j) * self.nt + k] = value;
    }

    /// Returns the tabulated current for a charge at transverse distance
    /// `(x, y)` from the pixel center, `t` after its arrival at the anode.
    ///
    /// Coordinates that fall outside the tabulated bins return 0.
    pub fn value_at(&self, x: f64, y: f64, t: f64) -> f64 {
        let i = (x / self.bin_size - 0.5).round();
        let j = (y / self.bin_size - 0.5).round();
        let k = (t / self.time_step).round();

        if i < 0.0 || j < 0.0 || k < 0.0 {
            return 0.0;
        }
        let (i, j, k) = (i as usize, j as usize, k as usize);
        if i >= self.nx || j >= self.ny || k >= self.nt {
            return 0.0;
        }

        self.data[(i * self.ny + j) * self.nt + k]
    }
}

impl fmt::Display for ResponseTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "px-response {} {} {} {} {}",
            self.nx, self.ny, self.nt, self.bin_size, self.time_step
        )?;
        for row in self.data.chunks(self.nt.max(1)) {
            writeln!(f)?;
            let mut first = true;
            for value in row {
                if !first {
                    write!(f, " ")?;
                }
                write!(f, "{value}")?;
                first = false;
            }
        }
        Ok(())
    }
}

fn parse_table(input: &mut &str) -> winnow::Result<ResponseTable> {
    let _ = "px-response ".parse_next(input)?;
    let nx: usize = terminated(dec_uint, ' ').parse_next(input)?;
    let ny: usize = terminated(dec_uint, ' ').parse_next(input)?;
    let nt: usize = terminated(dec_uint, ' ').parse_next(input)?;
    let bin_size: f64 = terminated(float.verify(|v: &f64| *v > 0.0), ' ').parse_next(input)?;
    let time_step: f64 = float.verify(|v: &f64| *v > 0.0).parse_next(input)?;

    let Some(len) = nx.checked_mul(ny).and_then(|v| v.checked_mul(nt)) else {
        return fail.parse_next(input);
    };

    let mut data = Vec::with_capacity(len);
    for _ in 0..nx * ny {
        let _ = newline.parse_next(input)?;
        for k in 0..nt {
            if k > 0 {
                let _ = ' '.parse_next(input)?;
            }
            data.push(float.parse_next(input)?);
        }
    }

    Ok(ResponseTable {
        nx,
        ny,
        nt,
        bin_size,
        time_step,
        data,
    })
}

/// The error type returned when parsing a [`ResponseTable`] fails.
#[derive(Debug)]
pub struct ParseError {
    input: String,
    span: std::ops::Range<usize>,
}

impl ParseError {
    fn from_parse(error: winnow::error::ParseError<&str, ContextError>) -> Self {
        let input = error.input().to_string();
        let span = error.char_span();
        Self { input, span }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = annotate_snippets::Level::Error
            .title("invalid response table starting here")
            .snippet(
                annotate_snippets::Snippet::source(&self.input)
                    .fold(true)
                    .annotation(annotate_snippets::Level::Error.span(self.span.clone())),
            );
        let renderer = annotate_snippets::Renderer::plain();
        let rendered = renderer.render(message);
        rendered.fmt(f)
    }
}

impl std::error::Error for ParseError {}

impl std::str::FromStr for ResponseTable {
    type Err = ParseError;

    /// Parse a [`ResponseTable`] from its textual representation.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use pixsim::response::ResponseTable;
    /// # use std::str::FromStr;
    /// let string = std::fs::read_to_string("response.txt")?;
    /// let table = ResponseTable::from_str(&string)?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        terminated(parse_table, opt(newline))
            .parse(input)
            .map_err(ParseError::from_parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn table_2x2x3() -> ResponseTable {
        let mut table = ResponseTable::new(
            2,
            2,
            3,
            Positive::new(0.4).unwrap(),
            Positive::new(0.05).unwrap(),
        );
        table.set(0, 0, 0, 1.0);
        table.set(0, 1, 2, -0.25);
        table.set(1, 1, 1, 0.5);
        table
    }

    #[test]
    fn lookup_nearest_bin() {
        let table = table_2x2x3();

        // x/bin = 0.5 rounds down to index 0.
        assert_eq!(table.value_at(0.2, 0.2, 0.0), 1.0);
        assert_eq!(table.value_at(0.2, 0.2, 0.02), 1.0);
        assert_eq!(table.value_at(0.2, 0.61, 0.1), -0.25);
        assert_eq!(table.value_at(0.61, 0.61, 0.05), 0.5);
    }

    #[test]
    fn lookup_out_of_bounds_is_zero() {
        let table = table_2x2x3();

        assert_eq!(table.value_at(-1.0, 0.2, 0.0), 0.0);
        assert_eq!(table.value_at(0.2, -1.0, 0.0), 0.0);
        assert_eq!(table.value_at(0.2, 0.2, -0.5), 0.0);
        assert_eq!(table.value_at(5.0, 0.2, 0.0), 0.0);
        assert_eq!(table.value_at(0.2, 5.0, 0.0), 0.0);
        assert_eq!(table.value_at(0.2, 0.2, 100.0), 0.0);
    }

    #[test]
    fn display_round_trip() {
        let table = table_2x2x3();
        let text = table.to_string();

        assert!(text.starts_with("px-response 2 2 3 0.4 0.05\n"));
        assert_eq!(ResponseTable::from_str(&text).unwrap(), table);

        // A trailing newline is accepted.
        let text = format!("{text}\n");
        assert_eq!(ResponseTable::from_str(&text).unwrap(), table);
    }

    #[test]
    fn from_str_rejects_malformed_input() {
        assert!(ResponseTable::from_str("").is_err());
        assert!(ResponseTable::from_str("px-response 1 1 1 0 0.05\n0").is_err());
        assert!(ResponseTable::from_str("px-response 2 1 1 0.4 0.05\n0").is_err());
        assert!(ResponseTable::from_str("px-response 1 1 2 0.4 0.05\n0 x").is_err());
    }
}
