//! The c→s rewrite controller: TDS reassembly, policy evaluation, and
//! in-flight rewriting of SQL Batch and RPC messages.
//!
//! One controller instance is owned by the client→server pump of a single
//! connection. It is not `Sync`; the pump task is its only caller.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use proxy_metrics::{counters::keys, CounterStore, DecisionRecord, SharedDecisionSink};
use proxy_policy::{Event, PolicyEngine, RuleAction};
use proxy_rpc::{build_rpc_payload, load_param_types, lookup_param_type, rewrite_param_inplace, ParamTypeMap, ParamValue, RewriteOutcome};
use tds_protocol::{iter_packets, MessageAssembler, Message, PacketHeader, PacketStatus, PacketType};

use crate::config::ProxyConfig;

const FIXED_PACKET_ID: u8 = 1;

fn decode_sql_text(payload: &[u8]) -> String {
    if payload.len() % 2 == 0 {
        let units: Vec<u16> = payload
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        if let Ok(text) = String::from_utf16(&units) {
            return text;
        }
    }
    payload.iter().map(|&b| b as char).collect()
}

fn encode_sql_text(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

fn frame_message(packet_type: PacketType, spid: u16, payload: &[u8]) -> Vec<u8> {
    let length = (tds_protocol::PACKET_HEADER_SIZE + payload.len()) as u16;
    let header = PacketHeader::new(packet_type, PacketStatus::END_OF_MESSAGE, length)
        .with_spid(spid)
        .with_packet_id(FIXED_PACKET_ID);
    let mut out = header.encode_to_bytes().to_vec();
    out.extend_from_slice(payload);
    out
}

/// Per-connection state for the c→s rewrite path.
pub struct RewriteController {
    config: Arc<ProxyConfig>,
    engine: Option<Arc<PolicyEngine>>,
    counters: Arc<CounterStore>,
    decisions: SharedDecisionSink,
    param_types: ParamTypeMap,
    conn_id: String,
    buf: BytesMut,
    batch_assembler: MessageAssembler,
    rpc_assembler: MessageAssembler,
    last_spid: u16,
}

impl RewriteController {
    /// Build a controller for one connection. Loads the rule catalog and
    /// (optionally) the RPC param type map once, at pipe start, per §5's
    /// "rule list snapshot is immutable for the life of the pipe" rule.
    #[must_use]
    pub fn new(
        config: Arc<ProxyConfig>,
        engine: Option<Arc<PolicyEngine>>,
        counters: Arc<CounterStore>,
        decisions: SharedDecisionSink,
        conn_id: String,
    ) -> Self {
        let param_types = config
            .rpc_param_types_path
            .as_ref()
            .map(|path: &PathBuf| load_param_types(path))
            .unwrap_or_default();
        Self {
            config,
            engine,
            counters,
            decisions,
            param_types,
            conn_id,
            buf: BytesMut::new(),
            batch_assembler: MessageAssembler::new(),
            rpc_assembler: MessageAssembler::new(),
            last_spid: 0,
        }
    }

    /// Process one read's worth of client→server bytes, returning what to
    /// forward to the upstream (possibly empty).
    pub async fn process_chunk(&mut self, data: &[u8]) -> Vec<u8> {
        let start = Instant::now();
        self.buf.extend_from_slice(data);

        let (packets, consumed) = match iter_packets(&self.buf) {
            Ok(result) => result,
            Err(err) => {
                // Unparsable framing: fail open, forward the raw read
                // unchanged and drop our reassembly state for this
                // connection rather than risk corrupting a later message.
                tracing::debug!(conn_id = %self.conn_id, ?err, "framing error, passing through");
                self.buf.clear();
                return data.to_vec();
            }
        };

        let mut out = Vec::new();
        for packet in packets {
            self.last_spid = packet.header.spid;
            match packet.header.packet_type {
                PacketType::SqlBatch => {
                    if let Some(emitted) = self
                        .handle_batch_packet(packet.header.status, &packet.payload)
                        .await
                    {
                        out.extend(emitted);
                    }
                }
                PacketType::Rpc => {
                    if let Some(emitted) = self
                        .handle_rpc_packet(packet.header.status, &packet.payload)
                        .await
                    {
                        out.extend(emitted);
                    }
                }
                _ => {
                    out.extend_from_slice(&packet.header.encode_to_bytes());
                    out.extend_from_slice(&packet.payload);
                }
            }
        }
        let _ = self.buf.split_to(consumed);

        if out.len() > self.config.max_rewrite_bytes {
            self.counters.inc(keys::REWRITE_SKIPPED_SIZE, 1);
            out.clear();
        }
        if start.elapsed().as_millis() as u64 > self.config.time_budget_ms {
            self.counters.inc(keys::REWRITE_SKIPPED_BUDGET, 1);
        }
        out
    }

    async fn handle_batch_packet(&mut self, status: PacketStatus, payload: &[u8]) -> Option<Vec<u8>> {
        let message = match self.batch_assembler.push(PacketType::SqlBatch, status, payload) {
            Ok(message) => message?,
            Err(err) => {
                tracing::debug!(conn_id = %self.conn_id, ?err, "batch reassembly error");
                self.batch_assembler.clear();
                return None;
            }
        };
        Some(self.handle_batch(message).await)
    }

    async fn handle_rpc_packet(&mut self, status: PacketStatus, payload: &[u8]) -> Option<Vec<u8>> {
        let message = match self.rpc_assembler.push(PacketType::Rpc, status, payload) {
            Ok(message) => message?,
            Err(err) => {
                tracing::debug!(conn_id = %self.conn_id, ?err, "rpc reassembly error");
                self.rpc_assembler.clear();
                return None;
            }
        };
        Some(self.handle_rpc(message).await)
    }

    async fn handle_batch(&mut self, message: Message) -> Vec<u8> {
        let Some(engine) = &self.engine else {
            return frame_message(PacketType::SqlBatch, self.last_spid, &message.payload);
        };
        let spid = self.last_spid;
        let mut sql_text = Some(decode_sql_text(&message.payload));

        let whole_event = Event {
            sql_text: sql_text.clone(),
            ..Event::default()
        };
        let decision = engine.decide(&whole_event);
        self.log_decision(DecisionRecord {
            sample: sql_text.as_ref().map(|s| s.chars().take(200).collect()),
            spid: Some(spid),
            ..DecisionRecord::new(decision.action.label())
                .with_rule(decision.rule_id.clone(), decision.reason.clone())
        })
        .await;
        if let Some(rule_id) = &decision.rule_id {
            self.counters.inc_rule_action(rule_id, decision.action.label(), 1);
        }

        if decision.action == RuleAction::Block && self.config.enforcement_mode.is_enforce() {
            let dropped = self.apply_threshold_gate(decision.rule_id.as_deref());
            if dropped {
                return Vec::new();
            }
            // gated: forward the original text unmodified, skip column eval.
        } else {
            sql_text = self.column_level_autocorrect(engine, sql_text, spid).await;
        }

        match sql_text {
            Some(text) => frame_message(PacketType::SqlBatch, spid, &encode_sql_text(&text)),
            None => Vec::new(),
        }
    }

    /// Returns `true` if the rule's threshold gate allows the block to
    /// actually apply (counter `blocks` incremented); `false` if the hit
    /// count hasn't reached `min_hits_to_enforce` yet (counter
    /// `gated_by_threshold` incremented instead).
    fn apply_threshold_gate(&self, rule_id: Option<&str>) -> bool {
        let Some(rule_id) = rule_id else {
            self.counters.inc(keys::BLOCKS, 1);
            return true;
        };
        let Some(engine) = &self.engine else {
            self.counters.inc(keys::BLOCKS, 1);
            return true;
        };
        let Some(rule) = engine.get_rule(rule_id) else {
            self.counters.inc(keys::BLOCKS, 1);
            return true;
        };
        if rule.min_hits_to_enforce == 0 {
            self.counters.inc(keys::BLOCKS, 1);
            return true;
        }
        let hits = self.counters.enforcement_hits(rule_id);
        if hits < rule.min_hits_to_enforce {
            self.counters.inc(keys::GATED_BY_THRESHOLD, 1);
            false
        } else {
            self.counters.inc(keys::BLOCKS, 1);
            true
        }
    }

    async fn column_level_autocorrect(
        &self,
        engine: &PolicyEngine,
        sql_text: Option<String>,
        spid: u16,
    ) -> Option<String> {
        let sql_text = sql_text?;
        let (table, cols) = proxy_sql::extract_table_and_columns(&sql_text)?;
        let enforce = self.config.enforcement_mode.is_enforce();

        if let Some(mut rows) = proxy_sql::extract_multirow_values(&sql_text) {
            if rows.iter().all(|row| row.len() == cols.len()) {
                let mut changed_any = false;
                for row in &mut rows {
                    changed_any |= self
                        .autocorrect_row(engine, &table, &cols, row, spid)
                        .await;
                }
                if changed_any && enforce {
                    if let Some(new_sql) = proxy_sql::reconstruct_multirow_insert(&sql_text, &rows) {
                        return Some(new_sql);
                    }
                }
                return Some(sql_text);
            }
        }

        let mut values = proxy_sql::extract_values(&sql_text);
        if values.is_empty() || values.len() != cols.len() {
            return Some(sql_text);
        }
        let changed = self
            .autocorrect_row(engine, &table, &cols, &mut values, spid)
            .await;
        if changed && enforce {
            if let Some(new_sql) = proxy_sql::reconstruct_insert(&sql_text, &values)
                .or_else(|| proxy_sql::reconstruct_update(&sql_text, &cols, &values))
            {
                return Some(new_sql);
            }
        }
        Some(sql_text)
    }

    async fn autocorrect_row(
        &self,
        engine: &PolicyEngine,
        table: &str,
        cols: &[String],
        row: &mut [String],
        spid: u16,
    ) -> bool {
        let mut changed = false;
        for (idx, col) in cols.iter().enumerate() {
            let selector = format!("{table}.{col}");
            let event = Event {
                table: Some(table.to_string()),
                column: Some(selector.clone()),
                value: Some(row[idx].clone()),
                sql_text: None,
                ..Event::default()
            };
            let decision = engine.decide(&event);
            if decision.action != RuleAction::Autocorrect {
                continue;
            }
            let Some(suggestion) = proxy_normalize::suggest(&row[idx]) else {
                continue;
            };
            if suggestion.normalized == row[idx] {
                continue;
            }
            let before = row[idx].clone();
            row[idx] = suggestion.normalized.clone();
            changed = true;
            self.counters.inc(keys::AUTOCORRECT_SUGGESTED, 1);
            if let Some(rule_id) = &decision.rule_id {
                self.counters.inc_rule_action(rule_id, "autocorrect", 1);
            }
            self.log_decision(
                DecisionRecord::new("autocorrect")
                    .with_rule(decision.rule_id.clone(), decision.reason.clone())
                    .with_values(before, suggestion.normalized)
                    .with_column(selector)
                    .with_spid(spid),
            )
            .await;
        }
        changed
    }

    async fn handle_rpc(&mut self, message: Message) -> Vec<u8> {
        let Some(engine) = &self.engine else {
            return frame_message(PacketType::Rpc, self.last_spid, &message.payload);
        };
        let spid = self.last_spid;
        self.counters.inc(keys::RPC_SEEN, 1);

        let (proc, params) = proxy_rpc::extract_proc_and_params(&message.payload);
        let mut current_values: Vec<String> = params.iter().map(|p| p.value.clone()).collect();
        let mut block_rpc = false;

        for param in &params {
            let event = Event {
                column: Some(format!("@{}", param.name)),
                value: Some(param.value.clone()),
                ..Event::default()
            };
            let decision = engine.decide(&event);
            self.log_decision(
                DecisionRecord::new(decision.action.label())
                    .with_rule(decision.rule_id.clone(), decision.reason.clone())
                    .with_param(param.name.clone())
                    .with_spid(spid),
            )
            .await;
            if decision.action == RuleAction::Block {
                block_rpc = true;
            }
        }

        let enforce = self.config.enforcement_mode.is_enforce();
        if block_rpc && enforce {
            self.counters.inc(keys::RPC_BLOCKED, 1);
            return Vec::new();
        }

        if self.config.rpc_autocorrect_inplace && enforce && !params.is_empty() {
            let mut payload_new = message.payload.to_vec();
            let mut changed = false;
            for (idx, param) in params.iter().enumerate() {
                let event = Event {
                    column: Some(format!("@{}", param.name)),
                    value: Some(param.value.clone()),
                    ..Event::default()
                };
                let decision = engine.decide(&event);
                if decision.action != RuleAction::Autocorrect {
                    continue;
                }
                let Some(suggestion) = proxy_normalize::suggest(&param.value) else {
                    continue;
                };
                let outcome = rewrite_param_inplace(
                    &mut payload_new,
                    &param.value,
                    &suggestion.normalized,
                    self.config.rpc_truncate_on_autocorrect,
                );
                if outcome == RewriteOutcome::Applied {
                    changed = true;
                    current_values[idx] = suggestion.normalized.clone();
                    self.counters.inc(keys::RPC_AUTOCORRECT_INPLACE, 1);
                    if let Some(rule_id) = &decision.rule_id {
                        self.counters.inc_rule_action(rule_id, "rpc_autocorrect_inplace", 1);
                    }
                    self.log_decision(
                        DecisionRecord::new("rpc_autocorrect_inplace")
                            .with_rule(decision.rule_id.clone(), decision.reason.clone())
                            .with_param(param.name.clone())
                            .with_values(param.value.clone(), suggestion.normalized)
                            .with_spid(spid),
                    )
                    .await;
                }
            }

            if changed {
                let final_payload = if self.config.rpc_repack_builder {
                    let proc_name = proc.clone().unwrap_or_else(|| "sp_executesql".to_string());
                    let param_values: Vec<ParamValue> = params
                        .iter()
                        .zip(current_values.iter())
                        .map(|(p, value)| {
                            let ty = lookup_param_type(&self.param_types, &proc_name, &p.name)
                                .unwrap_or("nvarchar")
                                .to_string();
                            ParamValue {
                                name: p.name.clone(),
                                value: value.clone(),
                                ty,
                            }
                        })
                        .collect();
                    build_rpc_payload(&proc_name, &param_values)
                } else {
                    payload_new
                };
                return frame_message(PacketType::Rpc, spid, &final_payload);
            }
        }

        frame_message(PacketType::Rpc, spid, &message.payload)
    }

    async fn log_decision(&self, record: DecisionRecord) {
        self.decisions.append(record).await;
    }
}
