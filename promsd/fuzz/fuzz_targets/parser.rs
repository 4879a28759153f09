#![no_main]

use libfuzzer_sys::fuzz_target;
use promsd::{exposition, model::MetricType, parser, transform::Transforms};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(families) = parser::parse(text) else {
        return;
    };

    for (name, family) in &families {
        assert_eq!(name, &family.name);
        assert!(!family.metrics.is_empty(), "empty family {name} survived parsing");
        for metric in &family.metrics {
            assert_eq!(metric.value.metric_type(), family.metric_type);
            assert!(!metric.labels.contains_key(parser::RESERVED_NAME_LABEL));
        }
    }

    // Whatever parsed must render to text that parses again.
    let rendered = exposition::render(&families);
    let reparsed = parser::parse(&rendered)
        .unwrap_or_else(|e| panic!("rendered text rejected: {e}\n{rendered}"));
    assert_eq!(reparsed.len(), families.len());

    let transforms = Transforms {
        omit_component_name: true,
        downcase_metric_names: true,
    };
    let transformed = transforms.apply(families);
    assert!(
        transformed
            .values()
            .all(|f| f.metric_type != MetricType::Summary)
    );
});
