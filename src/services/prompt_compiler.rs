use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

use crate::api::middleware::AppError;
use crate::models::SchemaSnapshot;

/// A natural language request paired with a known-good (sql, dax) answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FewShotExample {
    pub request: String,
    pub sql: String,
    pub dax: String,
}

impl FewShotExample {
    fn new(request: &str, sql: &str, dax: &str) -> Self {
        Self {
            request: request.to_string(),
            sql: sql.to_string(),
            dax: dax.to_string(),
        }
    }
}

/// Generation request ready to hand to the LLM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPrompt {
    pub table: String,
    pub text: String,
    /// The schema was empty; the model was told to answer with empty blocks
    pub expects_decline: bool,
}

/// Builds schema-grounded prompts. Pure: no I/O once constructed.
#[derive(Debug, Clone)]
pub struct PromptCompiler {
    examples: Vec<FewShotExample>,
}

impl Default for PromptCompiler {
    fn default() -> Self {
        Self::with_examples(default_examples())
    }
}

impl PromptCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_examples(examples: Vec<FewShotExample>) -> Self {
        Self { examples }
    }

    /// Read a few-shot library from a JSON array of `{request, sql, dax}` objects
    pub fn load_examples(path: impl AsRef<Path>) -> Result<Vec<FewShotExample>, AppError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Internal(format!("Failed to read examples from {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            AppError::Internal(format!("Failed to parse examples from {}: {}", path.display(), e))
        })
    }

    pub fn examples(&self) -> &[FewShotExample] {
        &self.examples
    }

    pub fn compile(
        &self,
        table: &str,
        schema: &SchemaSnapshot,
        user_prompt: &str,
    ) -> Result<CompiledPrompt, AppError> {
        let user_prompt = user_prompt.trim();
        if user_prompt.is_empty() {
            return Err(AppError::Validation("Prompt cannot be empty".to_string()));
        }

        let mut text = String::new();
        text.push_str(
            "You are an analytics engineer who writes PostgreSQL queries and Power BI DAX expressions.\n",
        );
        text.push_str(
            "Translate the request into one SQL query and one DAX expression over the table below.\n\n",
        );

        let _ = writeln!(text, "Table: {}", table);
        text.push_str(&Self::column_section(schema));

        text.push_str("\nRules:\n");
        let _ = writeln!(
            text,
            "1. Reference only the table {} and the columns listed above. Never invent columns.",
            table
        );
        text.push_str("2. Write a single read-only PostgreSQL SELECT statement.\n");
        let _ = writeln!(
            text,
            "3. In DAX, reference columns as {}[column_name].",
            table
        );
        text.push_str("4. The SQL query and the DAX expression must compute the same result.\n");
        text.push_str(
            "5. Reply with exactly two fenced code blocks, the first labelled sql and the second labelled dax, and nothing else.\n",
        );

        if !self.examples.is_empty() {
            text.push_str("\nExamples (over other tables):\n");
            for example in &self.examples {
                let _ = write!(
                    text,
                    "\nRequest: {}\n```sql\n{}\n```\n```dax\n{}\n```\n",
                    example.request, example.sql, example.dax
                );
            }
        }

        let _ = write!(text, "\nRequest: {}\n", user_prompt);

        Ok(CompiledPrompt {
            table: table.to_string(),
            text,
            expects_decline: schema.is_empty(),
        })
    }

    fn column_section(schema: &SchemaSnapshot) -> String {
        if schema.is_empty() {
            return "Columns: none known.\n\
                    No columns are known for this table. Do not guess: reply with an empty ```sql``` block and an empty ```dax``` block.\n"
                .to_string();
        }

        let mut section = String::from("Columns:\n");
        for column in schema.columns() {
            let _ = write!(section, "  - {} ({})", column.name, column.data_type);
            if !column.nullable {
                section.push_str(" [NOT NULL]");
            }
            section.push('\n');
        }
        section
    }
}

fn default_examples() -> Vec<FewShotExample> {
    vec![
        FewShotExample::new(
            "Count orders per status (table orders: order_id, status, order_date, total)",
            "SELECT status, COUNT(*) AS order_count FROM orders GROUP BY status",
            "EVALUATE SUMMARIZECOLUMNS(orders[status], \"order_count\", COUNTROWS(orders))",
        ),
        FewShotExample::new(
            "Total revenue by month (table orders: order_id, status, order_date, total)",
            "SELECT date_trunc('month', order_date) AS order_month, SUM(total) AS revenue FROM orders GROUP BY order_month ORDER BY order_month",
            "Revenue = SUM(orders[total])",
        ),
        FewShotExample::new(
            "Average payment of refunded payments (table payments: payment_id, amount, refunded)",
            "SELECT AVG(amount) AS avg_refund FROM payments WHERE refunded = true",
            "Average Refund = CALCULATE(AVERAGE(payments[amount]), payments[refunded] = TRUE())",
        ),
    ]
}
