use std::fmt::Display;
use std::ops::Range;
use std::str::FromStr;

/// Parse `"a..b"` into `a..b`
pub fn parse_range<T>(s: &str) -> Result<Range<T>, String>
where
    T: FromStr,
    T::Err: Display,
{
    let v = s.split("..").collect::<Vec<_>>();
    if v.len() != 2 {
        return Err(format!("could not find '..' when parsing range '{s}'"))
    }
    let x = v[0].parse().map_err(|e| format!("{e}"))?;
    let y = v[1].parse().map_err(|e| format!("{e}"))?;
    Ok(x..y)
}

/// Parse `"x,y,z"`
pub fn parse_triplet<T>(s: &str) -> Result<(T,T,T), String>
where
    T: FromStr,
    T::Err: Display,
{
    let v = s.split(',').collect::<Vec<_>>();
    if v.len() != 3 {
        return Err(format!("expected three comma-separated values, got '{s}'"))
    }
    let parse = |x: &str| x.trim().parse::<T>().map_err(|e| format!("'{x}': {e}"));
    Ok((parse(v[0])?, parse(v[1])?, parse(v[2])?))
}

/// Group numeric digits to facilitate reading long numbers
pub fn group_digits<F: std::fmt::Display>(n: F) -> String {
    use numsep::{separate, Locale};
    separate(n, Locale::English)
}


pub mod timing {

    use super::group_digits;
    use std::time::Instant;
    use std::io::Write;

    pub struct Progress {
        previous: Instant,
    }

    impl Progress {

        #[allow(clippy::new_without_default)]
        pub fn new() -> Self { Self { previous: Instant::now() } }

        /// Print message, append ellipsis, flush stdout, stay on same line, start timer.
        pub fn start(&mut self, message: &str) {
            print!("{message} ... ");
            // Nothing useful to do if stdout is gone
            let _ = std::io::stdout().flush();
            self.start_timer();
        }

        /// Print message, go to next line, start timer
        pub fn startln(&mut self, message: &str) {
            self.start(message);
            println!();
            self.start_timer();
        }

        // Print time elapsed since last start or done
        pub fn done(&mut self) {
            println!("{} ms", group_digits(self.previous.elapsed().as_millis()));
            self.start_timer();
        }

        // Print message followed by time elapsed since last start or done
        pub fn done_with_message(&mut self, message: &str) {
            println!("{message}: {} ms",
                     group_digits(self.previous.elapsed().as_millis()));
            self.start_timer();
        }

        fn start_timer(&mut self) { self.previous = Instant::now() }
    }
}
