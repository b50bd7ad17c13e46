use super::{Language, Program, TestCase};

/// File name the wrapped program is written to inside the run directory.
pub fn file_name(language: Language) -> &'static str {
    match language {
        Language::Python => "main.py",
        Language::Javascript => "main.js",
    }
}

/// Appends a driver that calls the entry point once per case and prints
/// each return value on its own line (strings raw, everything else as JSON).
pub fn wrap(program: &Program, tests: &[TestCase]) -> String {
    match program.language {
        Language::Python => wrap_python(program, tests),
        Language::Javascript => wrap_javascript(program, tests),
    }
}

fn wrap_python(program: &Program, tests: &[TestCase]) -> String {
    let mut out = String::with_capacity(program.source.len() + 256);
    out.push_str(&program.source);
    out.push_str("\n\n\nif __name__ == \"__main__\":\n");
    out.push_str("    import json as __judge_json\n");
    out.push_str("    def __judge_emit(value):\n");
    out.push_str(
        "        print(value if isinstance(value, str) else __judge_json.dumps(value), flush=True)\n",
    );
    for case in tests {
        out.push_str(&format!(
            "    __judge_emit({}({}))\n",
            program.entry_point,
            single_line(&case.input)
        ));
    }
    out
}

fn wrap_javascript(program: &Program, tests: &[TestCase]) -> String {
    let mut out = String::with_capacity(program.source.len() + 256);
    out.push_str(&program.source);
    out.push_str("\n\n;(function () {\n");
    out.push_str("  const __judgeEmit = (value) =>\n");
    out.push_str(
        "    console.log(typeof value === \"string\" ? value : JSON.stringify(value));\n",
    );
    for case in tests {
        out.push_str(&format!(
            "  __judgeEmit({}({}));\n",
            program.entry_point,
            single_line(&case.input)
        ));
    }
    out.push_str("})();\n");
    out
}

// Inputs are argument lists; a stray newline would break the driver's indentation.
fn single_line(input: &str) -> String {
    input.lines().map(str::trim).collect::<Vec<_>>().join(" ")
}
