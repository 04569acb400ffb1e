use std::collections::BTreeMap;

use anyhow::Result as DbResult;
use chrono::Utc;
use rusqlite::types::ToSql;
use rusqlite::{Connection, params};
use uuid::Uuid;

use flowmail_core::store::{AccountDirectory, CampaignStore, TemplateStore};
use flowmail_core::{Error, Result};
use flowmail_types::models::{
    Campaign, CampaignPatch, CampaignStatus, EmailResult, EmailTemplate, NewCampaign,
    NewEmailResult, ResultStatus, TemplatePatch,
};

use crate::Database;
use crate::models::{
    CAMPAIGN_COLUMNS, CampaignRow, EmailResultRow, RESULT_COLUMNS, TEMPLATE_COLUMNS, TemplateRow,
};

// -- Campaigns --

impl CampaignStore for Database {
    fn create_campaign(&self, new: NewCampaign) -> Result<Campaign> {
        let id = Uuid::new_v4();
        let recipients = serde_json::to_string(&new.recipients).map_err(anyhow::Error::from)?;
        let created_at = Utc::now().to_rfc3339();

        let campaign = self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO campaigns (id, name, subject, html_content, flow_account, recipients,
                    delay_between_emails, batch_size, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    id.to_string(),
                    new.name,
                    new.subject,
                    new.html_content,
                    new.flow_account,
                    recipients,
                    new.delay_between_emails,
                    new.batch_size,
                    CampaignStatus::Draft.as_str(),
                    created_at,
                ],
            )?;
            query_campaign(conn, id)
        })?;

        campaign.ok_or_else(|| Error::campaign_not_found(id))
    }

    fn get_campaign(&self, id: Uuid) -> Result<Option<Campaign>> {
        Ok(self.with_conn(|conn| query_campaign(conn, id))?)
    }

    fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        Ok(self.with_conn(|conn| {
            query_campaigns(
                conn,
                &format!("SELECT {} FROM campaigns ORDER BY rowid", CAMPAIGN_COLUMNS),
                [],
            )
        })?)
    }

    fn list_campaigns_by_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>> {
        Ok(self.with_conn(|conn| {
            query_campaigns(
                conn,
                &format!(
                    "SELECT {} FROM campaigns WHERE status = ?1 ORDER BY rowid",
                    CAMPAIGN_COLUMNS
                ),
                [status.as_str()],
            )
        })?)
    }

    fn update_campaign(&self, id: Uuid, patch: &CampaignPatch) -> Result<Option<Campaign>> {
        Ok(self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE campaigns SET
                    name = COALESCE(?2, name),
                    subject = COALESCE(?3, subject),
                    html_content = COALESCE(?4, html_content),
                    flow_account = COALESCE(?5, flow_account),
                    delay_between_emails = COALESCE(?6, delay_between_emails),
                    batch_size = COALESCE(?7, batch_size)
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    patch.name,
                    patch.subject,
                    patch.html_content,
                    patch.flow_account,
                    patch.delay_between_emails,
                    patch.batch_size,
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_campaign(conn, id)
        })?)
    }

    fn transition_status(
        &self,
        id: Uuid,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<Option<Campaign>> {
        if from.is_empty() {
            return Ok(None);
        }

        Ok(self.with_conn_mut(|conn| {
            let placeholders: Vec<String> = (0..from.len()).map(|i| format!("?{}", i + 3)).collect();
            let sql = format!(
                "UPDATE campaigns SET status = ?2 WHERE id = ?1 AND status IN ({})",
                placeholders.join(", ")
            );

            let id_str = id.to_string();
            let to_str = to.as_str();
            let from_strs: Vec<&'static str> = from.iter().map(|s| s.as_str()).collect();
            let mut values: Vec<&dyn ToSql> = vec![&id_str as &dyn ToSql, &to_str as &dyn ToSql];
            values.extend(from_strs.iter().map(|s| s as &dyn ToSql));

            if conn.execute(&sql, values.as_slice())? == 0 {
                return Ok(None);
            }
            query_campaign(conn, id)
        })?)
    }

    fn delete_campaign(&self, id: Uuid) -> Result<bool> {
        Ok(self.with_conn_mut(|conn| {
            let removed = conn.execute("DELETE FROM campaigns WHERE id = ?1", [id.to_string()])?;
            Ok(removed > 0)
        })?)
    }

    fn delete_finished_campaigns_for_account(&self, flow_account: &str) -> Result<Vec<Uuid>> {
        let ids = self.with_conn_mut(|conn| {
            let mut stmt = conn.prepare(
                "DELETE FROM campaigns
                 WHERE flow_account = ?1 AND status IN ('completed', 'stopped')
                 RETURNING id",
            )?;
            let rows = stmt.query_map([flow_account], |row| row.get::<_, String>(0))?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })?;

        ids.iter()
            .map(|id| Uuid::parse_str(id).map_err(|e| Error::Storage(e.into())))
            .collect()
    }

    fn record_send(
        &self,
        id: Uuid,
        expected_processed: u32,
        result: NewEmailResult,
    ) -> Result<Option<(Campaign, EmailResult)>> {
        let (success, failed) = match result.status {
            ResultStatus::Success => (1, 0),
            ResultStatus::Failed => (0, 1),
        };

        let recorded = self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;

            let advanced = tx.execute(
                "UPDATE campaigns SET
                    processed_count = processed_count + 1,
                    success_count = success_count + ?3,
                    failed_count = failed_count + ?4
                 WHERE id = ?1 AND processed_count = ?2",
                params![id.to_string(), expected_processed, success, failed],
            )?;
            if advanced == 0 {
                return Ok(None);
            }

            let result_id = Uuid::new_v4();
            tx.execute(
                "INSERT INTO email_results (id, campaign_id, email, status, response, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    result_id.to_string(),
                    id.to_string(),
                    result.email,
                    result.status.as_str(),
                    result.response,
                    Utc::now().to_rfc3339(),
                ],
            )?;

            let campaign = query_campaign(&tx, id)?;
            let row = tx
                .query_row(
                    &format!("SELECT {} FROM email_results WHERE id = ?1", RESULT_COLUMNS),
                    [result_id.to_string()],
                    EmailResultRow::from_row,
                )?
                .into_result()?;

            tx.commit()?;
            Ok(campaign.map(|c| (c, row)))
        })?;

        Ok(recorded)
    }

    fn list_results(&self, campaign_id: Uuid) -> Result<Vec<EmailResult>> {
        Ok(self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM email_results WHERE campaign_id = ?1 ORDER BY rowid",
                RESULT_COLUMNS
            ))?;
            let rows = stmt
                .query_map([campaign_id.to_string()], EmailResultRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(EmailResultRow::into_result).collect()
        })?)
    }

    fn clear_results(&self, campaign_id: Uuid) -> Result<usize> {
        Ok(self.with_conn_mut(|conn| {
            let removed = conn.execute(
                "DELETE FROM email_results WHERE campaign_id = ?1",
                [campaign_id.to_string()],
            )?;
            Ok(removed)
        })?)
    }

    fn reconcile_counts(&self, id: Uuid) -> Result<Option<Campaign>> {
        Ok(self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE campaigns SET
                    success_count = (SELECT COUNT(*) FROM email_results
                                     WHERE campaign_id = ?1 AND status = 'success'),
                    failed_count = (SELECT COUNT(*) FROM email_results
                                    WHERE campaign_id = ?1 AND status = 'failed'),
                    processed_count = (SELECT COUNT(*) FROM email_results WHERE campaign_id = ?1)
                 WHERE id = ?1",
                [id.to_string()],
            )?;
            query_campaign(conn, id)
        })?)
    }
}

// -- Flow accounts --

enum Rename {
    Done,
    Missing,
    Taken,
}

impl AccountDirectory for Database {
    fn list_accounts(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT name, url FROM flow_accounts ORDER BY name")?;
            let accounts = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<std::result::Result<BTreeMap<String, String>, _>>()?;
            Ok(accounts)
        })?)
    }

    fn create_account(&self, name: &str, url: &str) -> Result<()> {
        let inserted = self.with_conn_mut(|conn| {
            Ok(conn.execute(
                "INSERT OR IGNORE INTO flow_accounts (name, url) VALUES (?1, ?2)",
                [name, url],
            )?)
        })?;
        if inserted == 0 {
            return Err(Error::Conflict("Account name already exists".into()));
        }
        Ok(())
    }

    fn update_account(&self, name: &str, new_name: &str, url: &str) -> Result<()> {
        let outcome = self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            if !account_exists(&tx, name)? {
                return Ok(Rename::Missing);
            }
            if name != new_name && account_exists(&tx, new_name)? {
                return Ok(Rename::Taken);
            }
            tx.execute(
                "UPDATE flow_accounts SET name = ?2, url = ?3 WHERE name = ?1",
                [name, new_name, url],
            )?;
            tx.commit()?;
            Ok(Rename::Done)
        })?;

        match outcome {
            Rename::Done => Ok(()),
            Rename::Missing => Err(Error::account_not_found(name)),
            Rename::Taken => Err(Error::Conflict(format!(
                "Account name \"{}\" already exists",
                new_name
            ))),
        }
    }

    fn delete_account(&self, name: &str) -> Result<()> {
        let removed = self.with_conn_mut(|conn| {
            Ok(conn.execute("DELETE FROM flow_accounts WHERE name = ?1", [name])?)
        })?;
        if removed == 0 {
            return Err(Error::account_not_found(name));
        }
        Ok(())
    }

    fn resolve(&self, name: &str) -> Result<Option<String>> {
        Ok(self.with_conn(|conn| {
            conn.query_row("SELECT url FROM flow_accounts WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .optional()
        })?)
    }
}

// -- Templates --

impl TemplateStore for Database {
    fn list_templates(&self) -> Result<Vec<EmailTemplate>> {
        Ok(self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM email_templates ORDER BY rowid",
                TEMPLATE_COLUMNS
            ))?;
            let rows = stmt
                .query_map([], TemplateRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(TemplateRow::into_template).collect()
        })?)
    }

    fn get_template(&self, id: Uuid) -> Result<Option<EmailTemplate>> {
        Ok(self.with_conn(|conn| query_template(conn, id))?)
    }

    fn create_template(&self, template: EmailTemplate) -> Result<EmailTemplate> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO email_templates (id, name, subject, html_content, flow_account,
                    delay_between_emails, batch_size)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    template.id.to_string(),
                    template.name,
                    template.subject,
                    template.html_content,
                    template.flow_account,
                    template.delay_between_emails,
                    template.batch_size,
                ],
            )?;
            Ok(())
        })?;
        Ok(template)
    }

    fn update_template(&self, id: Uuid, patch: &TemplatePatch) -> Result<Option<EmailTemplate>> {
        Ok(self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE email_templates SET
                    name = COALESCE(?2, name),
                    subject = COALESCE(?3, subject),
                    html_content = COALESCE(?4, html_content),
                    flow_account = COALESCE(?5, flow_account),
                    delay_between_emails = COALESCE(?6, delay_between_emails),
                    batch_size = COALESCE(?7, batch_size)
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    patch.name,
                    patch.subject,
                    patch.html_content,
                    patch.flow_account,
                    patch.delay_between_emails,
                    patch.batch_size,
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_template(conn, id)
        })?)
    }

    fn delete_template(&self, id: Uuid) -> Result<bool> {
        Ok(self.with_conn_mut(|conn| {
            let removed =
                conn.execute("DELETE FROM email_templates WHERE id = ?1", [id.to_string()])?;
            Ok(removed > 0)
        })?)
    }
}

fn query_campaign(conn: &Connection, id: Uuid) -> DbResult<Option<Campaign>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM campaigns WHERE id = ?1", CAMPAIGN_COLUMNS),
            [id.to_string()],
            CampaignRow::from_row,
        )
        .optional()?;
    row.map(CampaignRow::into_campaign).transpose()
}

fn query_campaigns<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> DbResult<Vec<Campaign>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, CampaignRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(CampaignRow::into_campaign).collect()
}

fn query_template(conn: &Connection, id: Uuid) -> DbResult<Option<EmailTemplate>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM email_templates WHERE id = ?1", TEMPLATE_COLUMNS),
            [id.to_string()],
            TemplateRow::from_row,
        )
        .optional()?;
    row.map(TemplateRow::into_template).transpose()
}

fn account_exists(conn: &Connection, name: &str) -> DbResult<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM flow_accounts WHERE name = ?1", [name], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> DbResult<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> DbResult<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
