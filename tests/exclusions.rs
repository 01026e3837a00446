use gcovrs::exclusions::{apply_all_exclusions, ExclusionOptions};
use gcovrs::ingest::{ingest_report, IngestOptions};
use gcovrs::model::{BranchCoverage, CovData, FileCoverage, LineCoverage};

fn source_lines(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|line| (*line).to_string()).collect()
}

fn filecov_for(linenos: &[(u32, u64)]) -> FileCoverage {
    let mut filecov = FileCoverage::new("example.cpp".to_string());
    for (lineno, count) in linenos {
        filecov
            .lines
            .insert(*lineno, LineCoverage::new(*lineno, *count, None));
    }
    filecov
}

#[test]
fn single_line_marker() {
    let mut filecov = filecov_for(&[(1, 3), (2, 3)]);
    let lines = source_lines(&["foo(); // GCOVR_EXCL_LINE", "bar();"]);

    apply_all_exclusions(&mut filecov, &lines, &ExclusionOptions::default());

    assert!(filecov.lines[&1].excluded);
    assert!(!filecov.lines[&2].excluded);
}

#[test]
fn start_stop_region_includes_stop_line() {
    let mut filecov = filecov_for(&[(2, 1), (3, 1), (4, 1), (5, 1), (6, 1), (7, 1)]);
    let lines = source_lines(&[
        "",
        "before();",
        "// GCOVR_EXCL_START",
        "a();",
        "b();",
        "// GCOVR_EXCL_STOP",
        "after();",
    ]);

    apply_all_exclusions(&mut filecov, &lines, &ExclusionOptions::default());

    assert!(!filecov.lines[&2].excluded);
    for lineno in 3..=6 {
        assert!(filecov.lines[&lineno].excluded, "line {lineno}");
    }
    assert!(!filecov.lines[&7].excluded);
}

#[test]
fn exclusion_is_idempotent() {
    let build = || {
        let mut filecov = filecov_for(&[(1, 3), (2, 5), (3, 0)]);
        filecov.lines.get_mut(&2).unwrap().branches.insert(
            0,
            BranchCoverage {
                count: 2,
                ..BranchCoverage::default()
            },
        );
        filecov
    };
    let lines = source_lines(&["foo(); // GCOVR_EXCL_LINE", "if (x) {", "}"]);
    let options = ExclusionOptions {
        exclude_noncode_lines: true,
        ..ExclusionOptions::default()
    };

    let mut once = build();
    apply_all_exclusions(&mut once, &lines, &options);

    let mut twice = build();
    apply_all_exclusions(&mut twice, &lines, &options);
    apply_all_exclusions(&mut twice, &lines, &options);

    for lineno in [1, 2, 3] {
        let a = &once.lines[&lineno];
        let b = &twice.lines[&lineno];
        assert_eq!(a.count, b.count, "line {lineno}");
        assert_eq!(a.excluded, b.excluded, "line {lineno}");
        assert_eq!(a.noncode, b.noncode, "line {lineno}");
        assert_eq!(a.branches.len(), b.branches.len(), "line {lineno}");
    }
}

#[test]
fn branch_marker_keeps_line_coverage() {
    let mut filecov = filecov_for(&[(1, 5)]);
    filecov
        .lines
        .get_mut(&1)
        .unwrap()
        .branches
        .insert(0, BranchCoverage::default());
    let lines = source_lines(&["if (x) { // GCOVR_EXCL_BR_LINE"]);

    apply_all_exclusions(&mut filecov, &lines, &ExclusionOptions::default());

    let linecov = &filecov.lines[&1];
    assert!(!linecov.excluded);
    assert_eq!(linecov.count, 5);
    assert!(linecov.branches.is_empty());
}

#[test]
fn custom_pattern_excludes_fully_matching_lines() {
    let mut filecov = filecov_for(&[(1, 1), (2, 1)]);
    let lines = source_lines(&["assert(x); // NOCOVER", "assert(y);"]);
    let options = ExclusionOptions {
        exclude_lines_by_pattern: Some(".*// NOCOVER".to_string()),
        ..ExclusionOptions::default()
    };

    apply_all_exclusions(&mut filecov, &lines, &options);

    assert!(filecov.lines[&1].excluded);
    assert!(!filecov.lines[&2].excluded);
}

#[test]
fn throw_branches_are_removed_when_enabled() {
    let mut filecov = filecov_for(&[(1, 1)]);
    let linecov = filecov.lines.get_mut(&1).unwrap();
    linecov.branches.insert(
        0,
        BranchCoverage {
            count: 1,
            throw: true,
            ..BranchCoverage::default()
        },
    );
    linecov.branches.insert(
        1,
        BranchCoverage {
            count: 1,
            ..BranchCoverage::default()
        },
    );

    let options = ExclusionOptions {
        exclude_throw_branches: true,
        ..ExclusionOptions::default()
    };
    apply_all_exclusions(&mut filecov, &source_lines(&["foo();"]), &options);

    assert_eq!(filecov.lines[&1].branches.len(), 1);
}

#[test]
fn markers_can_be_disabled() {
    let mut filecov = filecov_for(&[(1, 3)]);
    let lines = source_lines(&["foo(); // GCOVR_EXCL_LINE"]);
    let options = ExclusionOptions {
        respect_exclusion_markers: false,
        ..ExclusionOptions::default()
    };

    apply_all_exclusions(&mut filecov, &lines, &options);
    assert!(!filecov.lines[&1].excluded);
}

#[test]
fn custom_prefix_is_honored() {
    let mut filecov = filecov_for(&[(1, 3), (2, 3)]);
    let lines = source_lines(&["foo(); // LCOV_EXCL_LINE", "bar(); // GCOVR_EXCL_LINE"]);
    let options = ExclusionOptions {
        exclude_pattern_prefix: "LCOV".to_string(),
        ..ExclusionOptions::default()
    };

    apply_all_exclusions(&mut filecov, &lines, &options);

    assert!(filecov.lines[&1].excluded);
    assert!(!filecov.lines[&2].excluded);
}

#[test]
fn end_to_end_ingest_with_markers() {
    let content = include_str!("fixtures/exclusions.gcov");
    let lines: Vec<&str> = content.lines().collect();

    let mut covdata = CovData::new();
    ingest_report(&mut covdata, &lines, "excl.gcov", &IngestOptions::default()).unwrap();

    let filecov = &covdata.files["src/excl.cpp"];

    // Line marker.
    assert!(filecov.lines[&2].excluded);
    assert_eq!(filecov.lines[&2].count, 0);

    // Region marker, stop line included.
    for lineno in 6..=9 {
        assert!(filecov.lines[&lineno].excluded, "line {lineno}");
    }

    // Branch marker: line stays, branches go.
    let branch_line = &filecov.lines[&12];
    assert!(!branch_line.excluded);
    assert_eq!(branch_line.count, 4);
    assert!(branch_line.branches.is_empty());

    // Unmarked lines are untouched.
    assert!(!filecov.lines[&3].excluded);
    assert_eq!(filecov.lines[&13].count, 3);
}
