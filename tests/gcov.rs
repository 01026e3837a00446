use gcovrs::error::GcovrsError;
use gcovrs::parsers::gcov::{parse_coverage, parse_metadata, ParserOptions};

fn fixture_lines(content: &str) -> Vec<&str> {
    content.lines().collect()
}

#[test]
fn parse_sample_fixture() {
    let content = include_str!("fixtures/sample.gcov");
    let lines = fixture_lines(content);

    let metadata = parse_metadata("sample.gcov", &lines).unwrap();
    assert_eq!(
        metadata.get("Source"),
        Some(&Some("src/calc.cpp".to_string()))
    );
    assert_eq!(metadata.get("Runs"), Some(&Some("1".to_string())));

    let (filecov, src_lines) =
        parse_coverage(&lines, "src/calc.cpp", &ParserOptions::default()).unwrap();

    // Noncode lines (braces, blanks, includes) are not inserted.
    assert!(!filecov.lines.contains_key(&1));
    assert!(!filecov.lines.contains_key(&5));

    assert_eq!(filecov.lines[&3].count, 5);
    assert_eq!(filecov.lines[&8].count, 4);
    assert!(filecov.lines[&14].is_uncovered());
    assert!(filecov.lines[&15].is_uncovered());

    // Branches on line 8, with the destination block recorded.
    let branches = &filecov.lines[&8].branches;
    assert_eq!(branches.len(), 2);
    assert_eq!(branches[&0].count, 1);
    assert!(branches[&0].fallthrough);
    assert_eq!(branches[&1].count, 3);
    assert_eq!(branches[&0].destination_blockno, Some(0));

    // Function tags are attached to the next source line.
    assert_eq!(filecov.functions["_Z3addii"].count.get(&3), Some(&5));
    assert_eq!(filecov.functions["_Z3divii"].count.get(&7), Some(&4));
    assert_eq!(filecov.functions["_Z6unusedv"].count.get(&14), Some(&0));

    // The reconstructed source text matches the report's code column.
    assert_eq!(src_lines[2], "int add(int a, int b) {");
    assert_eq!(src_lines[13], "int unused() {");
}

#[test]
fn parse_inline_report() {
    let lines = vec![
        "        -:    0:Source:tmp.cpp",
        "        1:    7:  Foo(): b (1000) {}",
        "    #####:    8:  bar();",
    ];
    let (filecov, _) = parse_coverage(&lines, "tmp.cpp", &ParserOptions::default()).unwrap();

    assert_eq!(filecov.lines[&7].count, 1);
    assert_eq!(filecov.lines[&8].count, 0);
    assert!(filecov.lines[&8].is_uncovered());
}

#[test]
fn malformed_line_is_fatal_by_default() {
    let lines = vec![
        "        -:    0:Source:tmp.cpp",
        "        1:    1:foo();",
        "gibberish that matches no known line type",
    ];
    assert!(matches!(
        parse_coverage(&lines, "tmp.cpp", &ParserOptions::default()),
        Err(GcovrsError::Parse { .. })
    ));
}

#[test]
fn resynchronization_keeps_valid_lines() {
    let options = ParserOptions {
        ignore_parse_errors: true,
        ..ParserOptions::default()
    };
    let lines = vec![
        "        -:    0:Source:tmp.cpp",
        "        2:    1:foo();",
        "gibberish that matches no known line type",
        "        3:    2:bar();",
        "        4:    3:baz();",
    ];
    let (filecov, _) = parse_coverage(&lines, "tmp.cpp", &options).unwrap();

    assert_eq!(filecov.lines.len(), 3);
    assert_eq!(filecov.lines[&1].count, 2);
    assert_eq!(filecov.lines[&2].count, 3);
    assert_eq!(filecov.lines[&3].count, 4);
}

#[test]
fn specialization_sections_are_tolerated() {
    let lines = vec![
        "        -:    0:Source:tmp.cpp",
        "function _Z3maxIiET_S0_S0_ called 3 returned 100% blocks executed 100%",
        "        3:    5:T max(T a, T b) {",
        "------------------",
        "_Z3maxIiET_S0_S0_:",
        "function _Z3maxIiET_S0_S0_ called 3 returned 100% blocks executed 100%",
        "        3:    5:T max(T a, T b) {",
    ];
    let (filecov, _) = parse_coverage(&lines, "tmp.cpp", &ParserOptions::default()).unwrap();

    // The repeated source line merges; the repeated function tag merges
    // onto the same line.
    assert_eq!(filecov.lines[&5].count, 6);
    assert_eq!(filecov.functions["_Z3maxIiET_S0_S0_"].count.get(&5), Some(&6));
}

#[test]
fn si_suffixed_and_percentage_counts_decode() {
    let lines = vec![
        "        -:    0:Source:tmp.cpp",
        "     1.7k:    1:hot();",
        "        5:    2:if (x) {",
        "branch  0 taken 17.2%",
        "branch  1 taken 0%",
    ];
    let (filecov, _) = parse_coverage(&lines, "tmp.cpp", &ParserOptions::default()).unwrap();

    assert_eq!(filecov.lines[&1].count, 1700);
    assert_eq!(filecov.lines[&2].branches[&0].count, 1);
    assert_eq!(filecov.lines[&2].branches[&1].count, 0);
}

#[test]
fn negative_hits_abort_without_ignore_flag() {
    let lines = vec![
        "        -:    0:Source:tmp.cpp",
        "       -1:    1:broken();",
    ];
    assert!(matches!(
        parse_coverage(&lines, "tmp.cpp", &ParserOptions::default()),
        Err(GcovrsError::Parse { .. })
    ));
}
