use async_trait::async_trait;
use tracing::debug;

use crate::{
    db::{KustoDb, KustoQuery, KustoTable},
    error::AppError,
    market::model::{HourlySummary, TickRecord},
};

#[async_trait]
pub trait TickRepository: Send + Sync {
    /// Distinct symbols, ascending.
    async fn list_symbols(&self) -> Result<Vec<String>, AppError>;

    /// Ticks for `symbol` in the trailing `hours`, ascending by time.
    async fn fetch_ticks(&self, symbol: &str, hours: i64) -> Result<Vec<TickRecord>, AppError>;

    /// Trailing-hour counts; `None` when the query yields no rows.
    async fn hourly_summary(&self) -> Result<Option<HourlySummary>, AppError>;
}

#[derive(Clone)]
pub struct KustoTickRepository {
    pub db: KustoDb,
    table: String,
}

impl KustoTickRepository {
    pub fn new(db: KustoDb, table: impl Into<String>) -> Self {
        Self {
            db,
            table: table.into(),
        }
    }

    fn symbols_query(&self) -> KustoQuery {
        KustoQuery::new(format!(
            "{}\n| summarize by symbol\n| order by symbol asc",
            self.table
        ))
    }

    fn ticks_query(&self, symbol: &str, hours: i64) -> KustoQuery {
        KustoQuery::new(format!(
            "{}\n\
             | where symbol == target_symbol\n\
             | where ['time'] > ago(window_hours * 1h)\n\
             | project symbol, ['time'], price, quantity, is_buyer_maker, trade_id\n\
             | order by ['time'] asc",
            self.table
        ))
        .string_param("target_symbol", symbol)
        .long_param("window_hours", hours)
    }

    fn summary_query(&self) -> KustoQuery {
        KustoQuery::new(format!(
            "{}\n\
             | where ['time'] > ago(1h)\n\
             | summarize count_1h = count(), symbols_1h = dcount(symbol), last_record = max(['time'])",
            self.table
        ))
    }
}

#[async_trait]
impl TickRepository for KustoTickRepository {
    async fn list_symbols(&self) -> Result<Vec<String>, AppError> {
        let table = self.db.execute(&self.symbols_query()).await?;
        let symbols = decode_symbols(&table)?;
        debug!(database = self.db.database(), count = symbols.len(), "listed symbols");
        Ok(symbols)
    }

    async fn fetch_ticks(&self, symbol: &str, hours: i64) -> Result<Vec<TickRecord>, AppError> {
        let table = self.db.execute(&self.ticks_query(symbol, hours)).await?;
        let ticks = decode_ticks(&table)?;
        debug!(symbol, hours, rows = ticks.len(), "fetched ticks");
        Ok(ticks)
    }

    async fn hourly_summary(&self) -> Result<Option<HourlySummary>, AppError> {
        let table = self.db.execute(&self.summary_query()).await?;
        decode_summary(&table)
    }
}

fn decode_symbols(table: &KustoTable) -> Result<Vec<String>, AppError> {
    table.rows().map(|row| row.string("symbol")).collect()
}

fn decode_ticks(table: &KustoTable) -> Result<Vec<TickRecord>, AppError> {
    table
        .rows()
        .map(|row| {
            Ok(TickRecord {
                symbol: row.string("symbol")?,
                time: row.datetime("time")?,
                price: row.f64("price")?,
                quantity: row.f64("quantity")?,
                is_buyer_maker: row.bool("is_buyer_maker")?,
                trade_id: row.string("trade_id")?,
            })
        })
        .collect()
}

fn decode_summary(table: &KustoTable) -> Result<Option<HourlySummary>, AppError> {
    let row = match table.rows().next() {
        Some(row) => row,
        None => return Ok(None),
    };

    let count = |column: &str| -> Result<u64, AppError> {
        let value = row.i64(column)?;
        u64::try_from(value)
            .map_err(|_| AppError::DecodeError(format!("negative {}: {}", column, value)))
    };

    Ok(Some(HourlySummary {
        trade_count: count("count_1h")?,
        symbol_count: count("symbols_1h")?,
        last_record: row.opt_datetime("last_record")?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn tick_query_binds_symbol_and_window() {
        let db = crate::db::KustoDb::new(
            reqwest::Client::new(),
            "https://cluster.kusto.windows.net",
            "market_data",
            std::sync::Arc::new(crate::db::CredentialResolver::new(
                "https://cluster.kusto.windows.net",
                Box::new(crate::db::credential::AzureCliCredential::new(
                    std::time::Duration::from_secs(1),
                )),
                vec![],
            )),
        );
        let repository = KustoTickRepository::new(db, "tick_data");

        let query = repository.ticks_query("ETHUSDT", 6);
        let csl = query.csl();
        assert!(csl.starts_with("declare query_parameters(target_symbol:string, window_hours:long);"));
        assert!(csl.contains("tick_data\n| where symbol == target_symbol"));
        assert!(!csl.contains("ETHUSDT"));
        assert_eq!(query.properties()["Parameters"]["target_symbol"], "ETHUSDT");
        assert_eq!(query.properties()["Parameters"]["window_hours"], "6");

        assert!(repository.symbols_query().csl().contains("summarize by symbol"));
        assert!(repository.summary_query().csl().contains("dcount(symbol)"));
    }

    #[test]
    fn decodes_tick_rows() {
        let table = KustoTable::from_response(
            r#"{"Tables":[{"Columns":[
                {"ColumnName":"symbol","ColumnType":"string"},
                {"ColumnName":"time","ColumnType":"datetime"},
                {"ColumnName":"price","ColumnType":"real"},
                {"ColumnName":"quantity","ColumnType":"real"},
                {"ColumnName":"is_buyer_maker","ColumnType":"bool"},
                {"ColumnName":"trade_id","ColumnType":"string"}
            ],"Rows":[["BTCUSDT","2024-05-01T10:00:00Z",100.0,1.0,false,"t-1"]]}]}"#,
        )
        .unwrap();

        let ticks = decode_ticks(&table).unwrap();
        assert_eq!(
            ticks,
            vec![TickRecord {
                symbol: "BTCUSDT".into(),
                time: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
                price: 100.0,
                quantity: 1.0,
                is_buyer_maker: false,
                trade_id: "t-1".into(),
            }]
        );
    }

    #[test]
    fn decodes_symbols_in_result_order() {
        let table = KustoTable::from_response(
            r#"{"Tables":[{"Columns":[{"ColumnName":"symbol","ColumnType":"string"}],"Rows":[["BTCUSDT"],["ETHUSDT"]]}]}"#,
        )
        .unwrap();
        assert_eq!(decode_symbols(&table).unwrap(), vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn decodes_summary_rows() {
        let columns = r#"[
            {"ColumnName":"count_1h","ColumnType":"long"},
            {"ColumnName":"symbols_1h","ColumnType":"long"},
            {"ColumnName":"last_record","ColumnType":"datetime"}
        ]"#;

        let populated = KustoTable::from_response(&format!(
            r#"{{"Tables":[{{"Columns":{},"Rows":[[1200,3,"2024-05-01T10:59:00Z"]]}}]}}"#,
            columns
        ))
        .unwrap();
        assert_eq!(
            decode_summary(&populated).unwrap(),
            Some(HourlySummary {
                trade_count: 1200,
                symbol_count: 3,
                last_record: Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 59, 0).unwrap()),
            })
        );

        let empty = KustoTable::from_response(&format!(
            r#"{{"Tables":[{{"Columns":{},"Rows":[]}}]}}"#,
            columns
        ))
        .unwrap();
        assert_eq!(decode_summary(&empty).unwrap(), None);
    }
}
