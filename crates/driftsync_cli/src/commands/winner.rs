//! Winner command implementation.

use super::InputError;
use driftsync_engine::DatabaseReconciliator;
use driftsync_protocol::{Branch, Branches, DatabaseVersionHeader};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A header given either as `A/(A1,B2)/T=10` or as a full object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum HeaderInput {
    /// Compact text form.
    Text(String),
    /// Structured form.
    Full(DatabaseVersionHeader),
}

impl HeaderInput {
    fn into_header(self) -> Result<DatabaseVersionHeader, InputError> {
        match self {
            Self::Text(text) => parse_header(&text),
            Self::Full(header) => Ok(header),
        }
    }
}

/// Result of the winner command.
#[derive(Debug, Serialize)]
pub struct WinnerResult {
    /// Winning replica, absent when no headers were given.
    pub winner: Option<String>,
    /// The winning branch in order.
    pub branch: Vec<String>,
    /// What each replica would prune and apply.
    pub replicas: Vec<ReplicaPlan>,
}

/// Prune and apply lists for one replica.
#[derive(Debug, Serialize)]
pub struct ReplicaPlan {
    /// Replica id.
    pub replica: String,
    /// Own headers not on the winning branch.
    pub prune: Vec<String>,
    /// Winning headers the replica is missing.
    pub apply: Vec<String>,
}

/// Runs the winner command.
pub fn run(file: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let input: BTreeMap<String, Vec<HeaderInput>> =
        serde_json::from_str(&std::fs::read_to_string(file)?)?;
    let result = decide(&read_branches(input)?)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Builds one branch per replica, keeping the listed order.
pub fn read_branches(
    input: BTreeMap<String, Vec<HeaderInput>>,
) -> Result<Branches, InputError> {
    let mut branches = Branches::new();
    for (replica, headers) in input {
        let branch = headers
            .into_iter()
            .map(HeaderInput::into_header)
            .collect::<Result<Branch, _>>()?;
        branches.put(replica, branch);
    }
    Ok(branches)
}

/// Picks the winner and derives every replica's plan.
pub fn decide(branches: &Branches) -> Result<WinnerResult, Box<dyn std::error::Error>> {
    let Some((winner, branch)) = DatabaseReconciliator::find_winner_branch(branches)? else {
        return Ok(WinnerResult {
            winner: None,
            branch: Vec::new(),
            replicas: Vec::new(),
        });
    };

    let replicas = branches
        .iter()
        .map(|(replica, own)| ReplicaPlan {
            replica: replica.to_string(),
            prune: names(&DatabaseReconciliator::find_losers_prune_branch(own, &branch)),
            apply: names(&DatabaseReconciliator::find_winners_apply_branch(own, &branch)),
        })
        .collect();

    Ok(WinnerResult {
        winner: Some(winner),
        branch: names(&branch),
        replicas,
    })
}

/// Parses `CLIENT/(CLOCK)/T=MILLIS`, the display form of a header.
pub fn parse_header(text: &str) -> Result<DatabaseVersionHeader, InputError> {
    let invalid = || InputError::InvalidHeader(text.to_string());

    let (client, rest) = text.trim().split_once('/').ok_or_else(invalid)?;
    let (clock, timestamp) = rest.rsplit_once("/T=").ok_or_else(invalid)?;
    if client.is_empty() {
        return Err(invalid());
    }
    let clock = clock.parse().map_err(|_| invalid())?;
    let timestamp = timestamp.parse().map_err(|_| invalid())?;
    Ok(DatabaseVersionHeader::new(client, clock, timestamp))
}

fn names(branch: &Branch) -> Vec<String> {
    branch.iter().map(ToString::to_string).collect()
}

fn print_text_output(result: &WinnerResult) {
    let Some(winner) = &result.winner else {
        println!("No headers given");
        return;
    };

    println!("Winner: {winner}");
    println!();
    println!("Branch:");
    for header in &result.branch {
        println!("  {header}");
    }
    for plan in &result.replicas {
        println!();
        println!("{}:", plan.replica);
        println!("  Prune: {}", plan.prune.join(" "));
        println!("  Apply: {}", plan.apply.join(" "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(json: &str) -> Branches {
        read_branches(serde_json::from_str(json).unwrap()).unwrap()
    }

    #[test]
    fn parses_display_form() {
        let header = parse_header("B/(A1,B2)/T=20").unwrap();
        assert_eq!(header.client, "B");
        assert_eq!(header.vector_clock.to_string(), "(A1,B2)");
        assert_eq!(header.timestamp, 20);
        assert_eq!(header.to_string(), "B/(A1,B2)/T=20");
    }

    #[test]
    fn rejects_malformed_headers() {
        for text in ["", "A", "A/(A1)", "/(A1)/T=1", "A/(A1)/T=x", "A/(A1,B)/T=1"] {
            assert!(parse_header(text).is_err(), "{text}");
        }
    }

    #[test]
    fn earlier_concurrent_branch_wins() {
        let branches = input(
            r#"{
                "A": ["A/(A1)/T=10", "A/(A2)/T=30"],
                "B": ["A/(A1)/T=10", "B/(A1,B1)/T=20"]
            }"#,
        );
        let result = decide(&branches).unwrap();
        assert_eq!(result.winner.as_deref(), Some("B"));
        assert_eq!(result.branch, vec!["A/(A1)/T=10", "B/(A1,B1)/T=20"]);

        let a = &result.replicas[0];
        assert_eq!(a.replica, "A");
        assert_eq!(a.prune, vec!["A/(A2)/T=30"]);
        assert_eq!(a.apply, vec!["B/(A1,B1)/T=20"]);
    }

    #[test]
    fn accepts_structured_headers() {
        let branches = input(
            r#"{ "C": [{ "client": "C", "vector_clock": { "C": 1 }, "timestamp": 5 }] }"#,
        );
        let result = decide(&branches).unwrap();
        assert_eq!(result.winner.as_deref(), Some("C"));
        assert_eq!(result.branch, vec!["C/(C1)/T=5"]);
    }

    #[test]
    fn empty_input_has_no_winner() {
        let result = decide(&Branches::new()).unwrap();
        assert!(result.winner.is_none());
    }
}
