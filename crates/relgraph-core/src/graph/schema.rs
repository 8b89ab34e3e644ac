//! Canonical SQLite layout of the property graph.
//!
//! - `nodes` holds one row per node with its JSON property object; the
//!   entity id is duplicated into `entity_id` so lookups can use an index
//! - `node_labels` holds the label set of each node (generic and
//!   tenant-scoped labels alike)
//! - `edges` holds typed, directed relationships with JSON properties
//! - `graph_meta` tracks the schema version

/// Migration v1: nodes, labels, edges and metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS nodes (
    node_id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id TEXT,
    props TEXT NOT NULL DEFAULT '{}' CHECK (json_valid(props))
);

CREATE TABLE IF NOT EXISTS node_labels (
    node_id INTEGER NOT NULL REFERENCES nodes(node_id) ON DELETE CASCADE,
    label TEXT NOT NULL CHECK (length(trim(label)) > 0),
    PRIMARY KEY (node_id, label)
);

CREATE TABLE IF NOT EXISTS edges (
    edge_id INTEGER PRIMARY KEY AUTOINCREMENT,
    rel_type TEXT NOT NULL CHECK (length(trim(rel_type)) > 0),
    src INTEGER NOT NULL REFERENCES nodes(node_id) ON DELETE CASCADE,
    dst INTEGER NOT NULL REFERENCES nodes(node_id) ON DELETE CASCADE,
    props TEXT NOT NULL DEFAULT '{}' CHECK (json_valid(props))
);

CREATE TABLE IF NOT EXISTS graph_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO graph_meta (id, schema_version) VALUES (1, 0);

CREATE INDEX IF NOT EXISTS idx_nodes_entity_id ON nodes(entity_id);
CREATE INDEX IF NOT EXISTS idx_node_labels_label ON node_labels(label, node_id);
CREATE INDEX IF NOT EXISTS idx_edges_src_type ON edges(src, rel_type);
CREATE INDEX IF NOT EXISTS idx_edges_dst_type ON edges(dst, rel_type);
";

/// Migration v2: subscription checkpoints and scheduler lookup index.
pub const MIGRATION_V2_SQL: &str = r"
CREATE TABLE IF NOT EXISTS projection_checkpoints (
    subscription TEXT PRIMARY KEY CHECK (length(trim(subscription)) > 0),
    position INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_nodes_mailbox
    ON nodes(json_extract(props, '$.mailbox'))
    WHERE json_extract(props, '$.mailbox') IS NOT NULL;
";

/// Indexes the graph relies on for tenant-scoped lookups.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_nodes_entity_id",
    "idx_node_labels_label",
    "idx_edges_src_type",
    "idx_edges_dst_type",
    "idx_nodes_mailbox",
];
