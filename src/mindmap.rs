use serde::Serialize;

pub const DEFAULT_SEEDS: [&str; 4] = ["Concept", "Definition", "Example", "Exercise"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub label: &'static str,
    pub weight: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MindMap {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

fn label_or(name: &str, fallback: &str) -> String {
    let t = name.trim();
    if t.is_empty() {
        fallback.to_string()
    } else {
        t.to_string()
    }
}

/// Subject at the root, one child per document. `max_nodes` counts the root.
pub fn subject_map(subject_id: &str, subject_name: &str, docs: &[(String, String)], max_nodes: usize) -> MindMap {
    let root = format!("subject:{}", subject_id);
    let mut map = MindMap::default();
    map.nodes.push(Node {
        id: root.clone(),
        label: label_or(subject_name, "Subject"),
        kind: "topic",
        score: 1.0,
    });
    for (i, (doc_id, name)) in docs.iter().take(max_nodes.saturating_sub(1)).enumerate() {
        let nid = format!("doc:{}", doc_id);
        map.nodes.push(Node {
            id: nid.clone(),
            label: label_or(name, &format!("Document {}", i + 1)),
            kind: "concept",
            score: 0.7,
        });
        map.edges.push(Edge {
            id: format!("e{}:{}", subject_id, doc_id),
            source: root.clone(),
            target: nid,
            label: "related",
            weight: 0.5,
        });
    }
    map
}

/// Seed words from a document's title (4+ chars) and description (6+ chars).
pub fn document_seeds(name: &str, describes: &str) -> Vec<String> {
    let mut seeds: Vec<String> = name
        .split_whitespace()
        .filter(|w| w.chars().count() >= 4)
        .take(5)
        .map(str::to_string)
        .collect();
    seeds.extend(
        describes
            .split_whitespace()
            .filter(|w| w.chars().count() >= 6)
            .take(5)
            .map(str::to_string),
    );
    if seeds.is_empty() {
        seeds = DEFAULT_SEEDS.iter().map(|s| s.to_string()).collect();
    }
    seeds
}

pub fn document_map(doc_id: &str, name: &str, describes: &str, max_nodes: usize) -> MindMap {
    let root = format!("doc:{}", doc_id);
    let mut map = MindMap::default();
    map.nodes.push(Node {
        id: root.clone(),
        label: label_or(name, "Document"),
        kind: "topic",
        score: 1.0,
    });
    let seeds = document_seeds(name, describes);
    for (i, w) in seeds.into_iter().take(max_nodes.saturating_sub(1)).enumerate() {
        let nid = format!("k:{}", i);
        map.nodes.push(Node {
            id: nid.clone(),
            label: w,
            kind: "concept",
            score: 0.6,
        });
        map.edges.push(Edge {
            id: format!("e:{}", i),
            source: root.clone(),
            target: nid,
            label: "related",
            weight: 0.4,
        });
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_map_respects_node_cap() {
        let docs: Vec<(String, String)> = (0..10)
            .map(|i| (format!("d{}", i), format!("Doc {}", i)))
            .collect();
        let m = subject_map("s1", "Biology", &docs, 4);
        assert_eq!(m.nodes.len(), 4);
        assert_eq!(m.edges.len(), 3);
        assert_eq!(m.nodes[0].id, "subject:s1");
        assert_eq!(m.edges[0].source, "subject:s1");
        assert_eq!(m.edges[0].target, "doc:d0");
    }

    #[test]
    fn document_seeds_from_title_and_description() {
        let seeds = document_seeds("Cell Biology Notes", "Covers mitochondria and membrane transport");
        assert_eq!(seeds, vec!["Cell", "Biology", "Notes", "Covers", "mitochondria", "membrane", "transport"]);
        assert_eq!(document_seeds("AI", ""), DEFAULT_SEEDS.to_vec());
    }

    #[test]
    fn node_type_serializes_as_type() {
        let m = document_map("d", "", "", 2);
        let v = serde_json::to_value(&m).expect("json");
        assert_eq!(v["nodes"][0]["type"], "topic");
        assert_eq!(v["nodes"][0]["label"], "Document");
        assert_eq!(v["nodes"].as_array().map(|a| a.len()), Some(2));
    }
}
