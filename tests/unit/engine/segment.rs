use super::*;
use crate::engine::closure::DiagnosticClosure;

fn diag(label: &str) -> Arc<dyn JobClosure> {
    DiagnosticClosure::new(label, JobKind::Calc).into_shared()
}

fn leaf(name: &str) -> Arc<ExitNode> {
    ExitNode::new(name).with_channel(diag(name), vec![]).shared()
}

#[test]
fn shared_exit_nodes_get_one_ticket() {
    let c = leaf("C");
    let a = ExitNode::new("A")
        .with_channel(diag("A"), vec![ExitLink::new(&c, 0)])
        .shared();
    let b = ExitNode::new("B")
        .with_channel(diag("B"), vec![ExitLink::new(&c, 0)])
        .shared();
    let t = ExitNode::new("T")
        .with_channel(diag("T"), vec![ExitLink::new(&a, 0), ExitLink::new(&b, 0)])
        .shared();

    let (seg, root) = build_segment(SegmentId(9), &t).unwrap();
    assert_eq!(seg.len(), 4);
    assert_eq!(seg.id(), SegmentId(9));
    assert_eq!(seg.ticket(root).name(), "T");
    // children are built first
    assert_eq!(seg.tickets().next().unwrap().name(), "C");
    assert_eq!(seg.find("B").unwrap().prerequisites(0)[0].ticket, seg.find("C").unwrap().id());
}

#[test]
fn node_without_channels_is_rejected() {
    let empty = ExitNode::new("void").shared();
    let err = build_segment(SegmentId(0), &empty).unwrap_err();
    assert!(err.to_string().contains("provides no channels"));
}

#[test]
fn link_to_missing_channel_is_rejected() {
    let c = leaf("C");
    let t = ExitNode::new("T")
        .with_channel(diag("T"), vec![ExitLink::new(&c, 3)])
        .shared();
    let err = build_segment(SegmentId(0), &t).unwrap_err();
    assert!(err.to_string().contains("missing channel 3"));
}

#[test]
fn excessive_nesting_is_rejected() {
    let mut node = leaf("n0");
    for i in 1..=MAX_BUILD_DEPTH + 2 {
        node = ExitNode::new(format!("n{i}"))
            .with_channel(diag("n"), vec![ExitLink::new(&node, 0)])
            .shared();
    }
    let err = build_segment(SegmentId(0), &node).unwrap_err();
    assert!(err.to_string().contains("nested deeper"));
}

fn bare_ticket(id: u32, name: &str, links: &[(u32, u32)]) -> JobTicket {
    JobTicket::new(
        TicketId(id),
        name,
        vec![Provision::new(diag(name), u64::from(id))],
        vec![links.iter().map(|&(t, c)| Prerequisite::new(TicketId(t), c)).collect()],
    )
}

#[test]
fn cycles_are_detected() {
    let tickets = vec![
        bare_ticket(0, "a", &[(2, 0)]),
        bare_ticket(1, "b", &[(0, 0)]),
        bare_ticket(2, "c", &[(1, 0)]),
    ];
    let err = Segment::from_tickets(SegmentId(0), tickets).unwrap_err();
    assert!(err.to_string().contains("cycle"));
}

#[test]
fn dangling_links_and_misplaced_ids_are_detected() {
    let dangling = vec![bare_ticket(0, "a", &[(5, 0)])];
    assert!(Segment::from_tickets(SegmentId(0), dangling).is_err());

    let bad_channel = vec![bare_ticket(0, "a", &[]), bare_ticket(1, "b", &[(0, 1)])];
    assert!(Segment::from_tickets(SegmentId(0), bad_channel).is_err());

    let misplaced = vec![bare_ticket(1, "a", &[])];
    let err = Segment::from_tickets(SegmentId(0), misplaced).unwrap_err();
    assert!(err.to_string().contains("stored at index 0"));

    let malformed = vec![JobTicket::new(TicketId(0), "m", vec![], vec![])];
    assert!(Segment::from_tickets(SegmentId(0), malformed).is_err());
}

#[test]
fn lookup_of_foreign_ticket_is_none() {
    let (seg, _) = build_segment(SegmentId(0), &leaf("only")).unwrap();
    assert!(seg.get(TicketId(1)).is_none());
    assert!(seg.find("other").is_none());
    assert!(!seg.is_empty());
}

const DIAMOND: &str = r#"{
  "segment": 4,
  "exit": "out",
  "nodes": {
    "src":   { "channels": [ { "kind": "load" } ] },
    "left":  { "channels": [ { "prerequisites": [ { "node": "src" } ] } ] },
    "right": { "channels": [ { "work_us": 10, "prerequisites": [ { "node": "src" } ] } ] },
    "out":   { "channels": [ { "prerequisites": [ { "node": "left" }, { "node": "right" } ] } ] }
  }
}"#;

#[test]
fn segment_description_builds_shared_tickets() {
    let spec = SegmentSpec::from_json_str(DIAMOND).unwrap();
    assert_eq!(spec.nodes["src"].channels[0].kind, JobKind::Load);
    assert_eq!(spec.nodes["right"].channels[0].work_us, 10);

    let mut requested = Vec::new();
    let (seg, root) = spec
        .build_with(|node, ch, c| {
            requested.push((node.to_owned(), ch));
            Arc::new(DiagnosticClosure::new(node, c.kind))
        })
        .unwrap();
    assert_eq!(seg.id(), SegmentId(4));
    assert_eq!(seg.len(), 4);
    assert_eq!(seg.ticket(root).name(), "out");
    assert_eq!(requested.iter().filter(|(n, _)| n == "src").count(), 1);

    let order: Vec<&str> = seg
        .ticket(root)
        .start_exploration(0)
        .map(|p| seg.ticket(p.ticket).ticket().name())
        .collect();
    assert_eq!(order, vec!["src", "left", "right", "out"]);
}

#[test]
fn segment_description_errors_are_reported() {
    let unknown = r#"{ "exit": "a", "nodes": { "a": { "channels": [ { "prerequisites": [ { "node": "zz" } ] } ] } } }"#;
    let err = SegmentSpec::from_json_str(unknown)
        .unwrap()
        .build_with(|n, _, c| Arc::new(DiagnosticClosure::new(n, c.kind)))
        .unwrap_err();
    assert!(err.to_string().contains("unknown node 'zz'"));

    let cyclic = r#"{ "exit": "a", "nodes": {
        "a": { "channels": [ { "prerequisites": [ { "node": "b" } ] } ] },
        "b": { "channels": [ { "prerequisites": [ { "node": "a" } ] } ] } } }"#;
    let err = SegmentSpec::from_json_str(cyclic)
        .unwrap()
        .build_with(|n, _, c| Arc::new(DiagnosticClosure::new(n, c.kind)))
        .unwrap_err();
    assert!(err.to_string().contains("cycle"));

    assert!(SegmentSpec::from_json_str("{ not json").is_err());
}
