//! Condition code descriptions.

/// Text for each `TWCC_*` code, indexed by code.
pub const CONDITION_TEXT: [&str; 24] = [
    "Success",
    "Failure due to unknown causes",
    "Not enough memory to perform operation",
    "No Data Source",
    "DS is connected to max possible applications",
    "DS or DSM reported internal error",
    "Unknown capability",
    "",
    "",
    "Unrecognized MSG DG DAT combination",
    "Data parameter out of range",
    "DG DAT MSG out of expected sequence",
    "Unknown destination Application/Source in DSM_Entry",
    "Capability not supported by source",
    "Operation not supported by capability",
    "Capability has dependancy on other capability",
    "File System operation is denied (file is protected)",
    "Operation failed because file already exists.",
    "File not found",
    "Operation failed because directory is not empty",
    "The feeder is jammed",
    "The feeder detected multiple pages",
    "Error writing the file (i.e. disk full conditions)",
    "The device went offline prior to or during this operation",
];

/// Describe a condition code, falling back to the raw number.
pub fn condition_text(code: u16) -> String {
    match CONDITION_TEXT.get(code as usize) {
        Some(text) if !text.is_empty() => (*text).to_string(),
        _ => format!("Failed with raw condition code {}", code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::*;

    #[test]
    fn test_known_and_unknown_codes() {
        assert_eq!(condition_text(TWCC_NODS), "No Data Source");
        assert_eq!(condition_text(TWCC_PAPERJAM), "The feeder is jammed");
        assert_eq!(condition_text(7), "Failed with raw condition code 7");
        assert_eq!(condition_text(900), "Failed with raw condition code 900");
    }
}
