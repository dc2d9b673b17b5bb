use crate::context::AppContext;
use anyhow::Result;
use log::info;

const RACE_TABLE_KEYWORDS: [&str; 1] = ["baba"];
const RESULT_TABLE_KEYWORDS: [&str; 7] = [
    "futan", "weight", "kinryo", "taiju", "zogen", "sex", "seibetsu",
];

/// Prints a table's columns and the ones matching each keyword.
pub async fn run(app: &AppContext, table: &str, keywords: &[String]) -> Result<()> {
    let keywords = effective_keywords(table, keywords);
    info!("Inspecting columns of {}", table);

    let db = app.database().await?;
    let columns = db.table_columns(table).await?;

    println!("Columns of {} ({}):", table, columns.len());
    println!("  {}", columns.join(", "));
    for keyword in &keywords {
        let matches = matching_columns(&columns, keyword);
        if matches.is_empty() {
            println!("Columns containing '{}': none", keyword);
        } else {
            println!("Columns containing '{}': {}", keyword, matches.join(", "));
        }
    }
    Ok(())
}

pub(crate) fn effective_keywords(table: &str, keywords: &[String]) -> Vec<String> {
    if !keywords.is_empty() {
        return keywords.to_vec();
    }
    let defaults: &[&str] = match table {
        "jvd_ra" => &RACE_TABLE_KEYWORDS,
        "jvd_se" => &RESULT_TABLE_KEYWORDS,
        _ => &[],
    };
    defaults.iter().map(|keyword| keyword.to_string()).collect()
}

pub(crate) fn matching_columns<'a>(columns: &'a [String], keyword: &str) -> Vec<&'a str> {
    let keyword = keyword.to_ascii_lowercase();
    columns
        .iter()
        .filter(|column| column.to_ascii_lowercase().contains(&keyword))
        .map(String::as_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tables_get_default_keywords() {
        assert_eq!(effective_keywords("jvd_ra", &[]), vec!["baba".to_string()]);
        assert_eq!(effective_keywords("jvd_se", &[]).len(), 7);
        assert!(effective_keywords("jvd_um", &[]).is_empty());
        assert_eq!(
            effective_keywords("jvd_se", &["odds".to_string()]),
            vec!["odds".to_string()]
        );
    }

    #[test]
    fn keyword_matching_is_substring_based() {
        let columns = vec![
            "babajotai_code_shiba".to_string(),
            "babajotai_code_dirt".to_string(),
            "kyori".to_string(),
        ];
        assert_eq!(
            matching_columns(&columns, "baba"),
            vec!["babajotai_code_shiba", "babajotai_code_dirt"]
        );
        assert!(matching_columns(&columns, "taiju").is_empty());
    }
}
