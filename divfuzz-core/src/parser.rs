use crate::optimization::{MethodVector, OptimizationVectors, FEATURES};

/// Parses the JIT's instrumentation stream into per-method optimization vectors.
///
/// Wire format: a `METHOD <class>.<method>` header line opens a new method block; subsequent
/// `OPT <FeatureName> ...` lines increment that method's count for `FeatureName`. Lines that match
/// neither pattern (interpreter chatter, GC logs, stray compiler output) are skipped rather than
/// treated as a parse error, since the instrumentation stream is interleaved with whatever else
/// the JVM writes to stderr.
pub fn parse_instrumentation(stream: &str) -> OptimizationVectors {
    let mut methods: Vec<MethodVector> = Vec::new();
    let mut current: Option<usize> = None;

    for line in stream.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("METHOD ") {
            let Some((class_name, method_name)) = rest.rsplit_once('.') else {
                continue;
            };
            methods.push(MethodVector::new(class_name, method_name));
            current = Some(methods.len() - 1);
        } else if let Some(rest) = line.strip_prefix("OPT ") {
            let Some(idx) = current else { continue };
            let feature_name = rest.split_whitespace().next().unwrap_or("");
            let feature_idx = FEATURES
                .iter()
                .position(|&name| name == feature_name)
                .unwrap_or(0);
            methods[idx].counts[feature_idx] += 1;
        }
    }

    OptimizationVectors { methods }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_methods_with_interleaved_noise() {
        let stream = "\
[GC] young pause 3ms
METHOD com.example.Foo.bar
OPT Inline reason=hot
some other irrelevant line
OPT LoopUnroll depth=2
METHOD com.example.Foo.baz
OPT ConstantFold
";
        let vectors = parse_instrumentation(stream);
        assert_eq!(vectors.methods.len(), 2);
        assert_eq!(vectors.methods[0].class_name, "com.example.Foo");
        assert_eq!(vectors.methods[0].method_name, "bar");
        assert_eq!(vectors.methods[0].total(), 2);
        assert_eq!(vectors.methods[1].method_name, "baz");
        assert_eq!(vectors.methods[1].total(), 1);
    }

    #[test]
    fn unknown_feature_falls_back_to_sentinel() {
        let stream = "METHOD a.b\nOPT TotallyMadeUpFeature\n";
        let vectors = parse_instrumentation(stream);
        assert_eq!(vectors.methods[0].counts[0], 1);
    }

    #[test]
    fn opt_line_before_any_method_is_ignored() {
        let stream = "OPT Inline\nMETHOD a.b\nOPT Inline\n";
        let vectors = parse_instrumentation(stream);
        assert_eq!(vectors.methods.len(), 1);
        assert_eq!(vectors.methods[0].total(), 1);
    }

    #[test]
    fn empty_stream_yields_no_methods() {
        assert!(parse_instrumentation("").is_empty());
    }
}
