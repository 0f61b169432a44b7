//! Compare command implementation.

use driftsync_protocol::{VectorClock, VectorClockComparison};

/// Runs the compare command.
pub fn run(a: &str, b: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", describe(&a.parse()?, &b.parse()?));
    Ok(())
}

/// One line naming the relation of `a` to `b`.
pub fn describe(a: &VectorClock, b: &VectorClock) -> String {
    let relation = match a.compare(b) {
        VectorClockComparison::Equal => "equals",
        VectorClockComparison::Smaller => "happened before",
        VectorClockComparison::Greater => "happened after",
        VectorClockComparison::Simultaneous => "is concurrent with",
    };
    format!("{a} {relation} {b}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn describe_str(a: &str, b: &str) -> String {
        describe(&a.parse().unwrap(), &b.parse().unwrap())
    }

    #[test]
    fn names_each_relation() {
        assert_eq!(describe_str("A1,B2", "B2,A1"), "(A1,B2) equals (A1,B2)");
        assert_eq!(describe_str("A1", "A1,B1"), "(A1) happened before (A1,B1)");
        assert_eq!(describe_str("A2,B1", "A1"), "(A2,B1) happened after (A1)");
        assert_eq!(describe_str("A1", "B1"), "(A1) is concurrent with (B1)");
    }

    #[test]
    fn rejects_malformed_clock() {
        assert!(run("A1,B", "A1").is_err());
    }
}
