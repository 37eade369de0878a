use std::net::IpAddr;

use bgptargets::config::ScoringWeights;
use bgptargets::extractor::Candidate;
use bgptargets::geo::GeoPoint;
use bgptargets::scorer::{merge_candidates, PriorityScorer};
use bgptargets::{CandidateKind, Prefix, ASN};

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn prefixes(list: &[&str]) -> Vec<Prefix> {
    list.iter().map(|p| p.parse().unwrap()).collect()
}

fn in_city(candidate: Candidate, city: &str) -> Candidate {
    candidate.with_location(Some(GeoPoint::new(Some(city), 25.0, 121.5)))
}

fn next_hop(addr: &str, asn: ASN, weight: u64, city: Option<&str>) -> Candidate {
    let candidate = Candidate::next_hop(ip(addr), asn, weight);
    match city {
        Some(city) => in_city(candidate, city),
        None => candidate,
    }
}

fn scorer(per_city_quota: usize, max_targets: usize) -> PriorityScorer {
    PriorityScorer::new(ScoringWeights::default(), per_city_quota, max_targets)
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn test_duplicate_nomination_takes_max_weight() {
    let candidates = vec![
        Candidate::next_hop(ip("1.34.0.1"), 3462, 3),
        Candidate::prefix_representative(ip("1.34.0.1"), 3462, &prefixes(&["1.34.0.0/16"])),
    ];

    let merged = merge_candidates(candidates);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].raw_weight, 3);
    assert_eq!(merged[0].kind, CandidateKind::NextHop);
    assert_eq!(merged[0].nominations.len(), 2);
    assert_eq!(merged[0].supporting()[0].kind, CandidateKind::PrefixRepresentative);
}

#[test]
fn test_representative_can_outweigh_next_hop() {
    let candidates = vec![
        Candidate::next_hop(ip("1.34.0.1"), 3462, 2),
        Candidate::prefix_representative(
            ip("1.34.0.1"),
            3462,
            &prefixes(&["1.34.0.0/15", "1.34.0.0/16", "1.34.0.0/24"]),
        ),
    ];

    let assembly = scorer(2, 10).rank(candidates);
    assert_eq!(assembly.targets.len(), 1);
    assert_eq!(assembly.provenance[0].raw_weight, 3);
    assert_eq!(assembly.provenance[0].kind, CandidateKind::PrefixRepresentative);
}

#[test]
fn test_equal_weight_prefers_next_hop_then_lower_asn() {
    let merged = merge_candidates(vec![
        Candidate::prefix_representative(ip("1.34.0.1"), 3462, &prefixes(&["1.34.0.0/16"])),
        Candidate::next_hop(ip("1.34.0.1"), 9924, 1),
        Candidate::next_hop(ip("1.34.0.1"), 4780, 1),
    ]);

    assert_eq!(merged[0].asn, 4780);
    assert_eq!(merged[0].kind, CandidateKind::NextHop);
    let asns: Vec<ASN> = merged[0].nominations.iter().map(|n| n.asn).collect();
    assert_eq!(asns, vec![4780, 9924, 3462]);
}

#[test]
fn test_location_survives_merge() {
    let merged = merge_candidates(vec![
        Candidate::next_hop(ip("1.34.0.1"), 3462, 5),
        in_city(
            Candidate::prefix_representative(ip("1.34.0.1"), 3462, &prefixes(&["1.34.0.0/16"])),
            "Taipei",
        ),
    ]);
    assert_eq!(merged[0].city(), Some("Taipei"));
}

#[test]
fn test_crowded_city_ranks_below_new_city() {
    let candidates = vec![
        next_hop("1.34.0.1", 3462, 10, Some("Taipei")),
        next_hop("1.34.0.2", 3462, 9, Some("Taipei")),
        next_hop("1.34.0.3", 3462, 5, Some("Hsinchu")),
    ];

    let assembly = scorer(1, 10).rank(candidates);
    let order: Vec<IpAddr> = assembly.targets.iter().map(|t| t.ip).collect();
    assert_eq!(order, vec![ip("1.34.0.1"), ip("1.34.0.3"), ip("1.34.0.2")]);

    assert!(approx(assembly.targets[0].score, 1.5));
    assert!(approx(assembly.targets[1].score, 1.0));
    assert!(approx(assembly.targets[2].score, 0.9 - 0.75));

    let crowded = &assembly.provenance[2];
    assert!(crowded.duplicate_city_penalty);
    assert!(!crowded.city_diversity_bonus);
    assert!(assembly.provenance[1].city_diversity_bonus);
}

#[test]
fn test_unresolved_candidates_get_no_bonus_or_penalty() {
    let assembly = scorer(1, 10).rank(vec![
        next_hop("1.34.0.1", 3462, 4, None),
        next_hop("1.34.0.2", 3462, 4, None),
    ]);

    for (target, prov) in assembly.targets.iter().zip(&assembly.provenance) {
        assert!(approx(target.score, 1.0));
        assert_eq!(target.city, None);
        assert!(!prov.city_diversity_bonus);
        assert!(!prov.duplicate_city_penalty);
    }
}

#[test]
fn test_equal_score_lower_ip_wins() {
    let assembly = scorer(2, 10).rank(vec![
        next_hop("10.0.0.2", 4780, 7, None),
        next_hop("10.0.0.1", 3462, 7, None),
    ]);

    assert_eq!(assembly.targets[0].ip, ip("10.0.0.1"));
    assert_eq!(assembly.targets[1].ip, ip("10.0.0.2"));
    assert!(approx(assembly.targets[0].score, assembly.targets[1].score));
}

#[test]
fn test_every_asn_gets_a_slot() {
    let candidates = vec![
        next_hop("10.1.0.1", 3462, 10, Some("Taipei")),
        next_hop("10.2.0.1", 3462, 10, Some("Taichung")),
        next_hop("10.3.0.1", 3462, 10, Some("Kaohsiung")),
        next_hop("10.4.0.1", 3462, 10, Some("Tainan")),
        next_hop("10.9.0.1", 9924, 1, None),
    ];

    let assembly = scorer(2, 3).rank(candidates);
    let picked: Vec<(IpAddr, ASN)> = assembly.targets.iter().map(|t| (t.ip, t.asn)).collect();
    assert_eq!(
        picked,
        vec![(ip("10.1.0.1"), 3462), (ip("10.2.0.1"), 3462), (ip("10.9.0.1"), 9924)]
    );
    assert_eq!(assembly.dropped, 2);
}

#[test]
fn test_supporting_nomination_covers_asn_without_own_address() {
    let candidates = vec![
        next_hop("10.0.0.1", 3462, 5, None),
        Candidate::prefix_representative(ip("10.0.0.1"), 9924, &prefixes(&["10.0.0.0/24"])),
        next_hop("10.0.0.2", 3462, 10, None),
        next_hop("10.0.0.3", 3462, 8, None),
    ];

    let assembly = scorer(2, 2).rank(candidates);
    let picked: Vec<IpAddr> = assembly.targets.iter().map(|t| t.ip).collect();
    // AS9924 represents no address, so 10.0.0.1 stands in for it over 10.0.0.3
    assert_eq!(picked, vec![ip("10.0.0.2"), ip("10.0.0.1")]);

    let shared = &assembly.provenance[1];
    let asns: Vec<ASN> = shared.nominations.iter().map(|n| n.asn).collect();
    assert_eq!(asns, vec![3462, 9924]);
}

#[test]
fn test_asn_with_own_address_is_not_covered_by_supporting_nomination() {
    let candidates = vec![
        next_hop("10.0.0.1", 3462, 5, None),
        next_hop("10.0.0.1", 9924, 1, None),
        next_hop("10.0.0.2", 3462, 10, None),
        next_hop("10.0.0.9", 9924, 1, None),
    ];

    let assembly = scorer(2, 2).rank(candidates);
    let picked: Vec<(IpAddr, ASN)> = assembly.targets.iter().map(|t| (t.ip, t.asn)).collect();
    assert_eq!(picked, vec![(ip("10.0.0.2"), 3462), (ip("10.0.0.9"), 9924)]);
    assert_eq!(assembly.dropped, 1);
}

#[test]
fn test_cutoff_drops_entries_and_ranks_are_dense() {
    let candidates: Vec<Candidate> = (1..=6)
        .map(|i| next_hop(&format!("1.34.0.{}", i), 3462, i as u64, None))
        .collect();

    let assembly = scorer(2, 4).rank(candidates);
    assert_eq!(assembly.targets.len(), 4);
    assert_eq!(assembly.considered, 6);
    assert_eq!(assembly.dropped, 2);

    let ranks: Vec<usize> = assembly.targets.iter().map(|t| t.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3, 4]);
    for pair in assembly.targets.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert_eq!(assembly.targets[0].ip, ip("1.34.0.6"));
}

#[test]
fn test_normalization_is_per_asn() {
    let assembly = scorer(2, 10).rank(vec![
        next_hop("1.34.0.1", 3462, 1000, None),
        next_hop("1.34.0.2", 3462, 500, None),
        next_hop("139.175.0.1", 4780, 3, None),
    ]);

    let seednet = assembly.provenance.iter().find(|p| p.asn == 4780).unwrap();
    assert!(approx(seednet.normalized_weight, 1.0));
    let half = assembly.provenance.iter().find(|p| p.ip == ip("1.34.0.2")).unwrap();
    assert!(approx(half.normalized_weight, 0.5));
}

#[test]
fn test_score_components() {
    let s = scorer(2, 10);
    let (score, bonus, penalty) = s.score(0.5, Some(0));
    assert!(approx(score, 1.0) && bonus && !penalty);

    let (score, bonus, penalty) = s.score(0.5, Some(1));
    assert!(approx(score, 0.5) && !bonus && !penalty);

    let (score, bonus, penalty) = s.score(0.5, Some(2));
    assert!(approx(score, -0.25) && !bonus && penalty);

    let (score, bonus, penalty) = s.score(0.5, None);
    assert!(approx(score, 0.5) && !bonus && !penalty);
}

#[test]
fn test_empty_input_gives_empty_assembly() {
    let assembly = scorer(2, 10).rank(Vec::new());
    assert!(assembly.targets.is_empty());
    assert_eq!(assembly.dropped, 0);
}
