use super::*;

#[test]
fn arithmetic_strings_and_coercion_follow_script_rules() -> Result<()> {
    let mut t = blank()?;
    t.assert_eval("1 + 2 * 3", "7")?;
    t.assert_eval("'4' + 2", "42")?;
    t.assert_eval("'4' * 2", "8")?;
    t.assert_eval("7 % 3", "1")?;
    t.assert_eval("2 ** 10", "1024")?;
    t.assert_eval("1 / 0", "Infinity")?;
    t.assert_eval("typeof null", "object")?;
    t.assert_eval("typeof undefined", "undefined")?;
    t.assert_eval("typeof (() => 1)", "function")?;
    t.assert_eval("null == undefined", "true")?;
    t.assert_eval("null === undefined", "false")?;
    t.assert_eval("'10' < '9'", "true")?;
    t.assert_eval("10 < 9", "false")?;
    t.assert_eval("-7 >> 1", "-4")?;
    t.assert_eval("-7 >>> 28", "15")?;
    Ok(())
}

#[test]
fn closures_destructuring_and_spread_work_together() -> Result<()> {
    let mut t = blank()?;
    let signals = t.run(
        r#"
        const makeCounter = () => {
          let count = 0;
          return { next: () => ++count };
        };
        const counter = makeCounter();
        counter.next();
        counter.next();
        const { a, b: [first, ...others], c = 'fallback' } = { a: 1, b: [2, 3, 4] };
        const merged = { ...{ x: 1 }, y: 2 };
        const list = [...others, first];
        debug(`${counter.next()}|${a}|${first}|${others.join(',')}|${c}|${merged.x + merged.y}|${list}`);
        pass();
        "#,
    );
    assert_eq!(
        signals,
        vec![Signal::Debug("3|1|2|3,4|fallback|3|3,4,2".into()), Signal::Pass]
    );
    Ok(())
}

#[test]
fn control_flow_statements_cover_loops_and_switch() -> Result<()> {
    let mut t = blank()?;
    let signals = t.run(
        r#"
        const out = [];
        for (let i = 0; i < 5; i++) {
          if (i === 1) continue;
          if (i === 4) break;
          out.push(i);
        }
        for (const ch of 'ab') out.push(ch);
        for (const key in { p: 1, q: 2 }) out.push(key);
        let n = 0;
        do { n++; } while (n < 3);
        out.push(n);
        switch (n) {
          case 1: out.push('one'); break;
          case 3: out.push('three');
          case 4: out.push('fall'); break;
          default: out.push('none');
        }
        debug(out.join(' '));
        pass();
        "#,
    );
    assert_eq!(
        signals,
        vec![Signal::Debug("0 2 3 a b p q 3 three fall".into()), Signal::Pass]
    );
    Ok(())
}

#[test]
fn optional_chaining_and_nullish_operators_short_circuit() -> Result<()> {
    let mut t = blank()?;
    t.assert_eval("null?.x.y.z", "undefined")?;
    t.assert_eval("({ a: { b: 5 } })?.a?.b", "5")?;
    t.assert_eval("null ?? 'd'", "d")?;
    t.assert_eval("0 ?? 'd'", "0")?;
    t.assert_eval("0 || 'd'", "d")?;
    t.assert_eval("'' && 'x'", "")?;
    Ok(())
}

#[test]
fn array_builtins_match_browser_results() -> Result<()> {
    let mut t = blank()?;
    t.assert_eval("[3, 1, 2].sort().join('-')", "1-2-3")?;
    t.assert_eval("[10, 9, 1].sort()", "1,10,9")?;
    t.assert_eval("[10, 9, 1].sort((a, b) => a - b)", "1,9,10")?;
    t.assert_eval("[1, 2, 3].map(x => x * 2).filter(x => x > 2)", "4,6")?;
    t.assert_eval("[1, 2, 3, 4].reduce((sum, x) => sum + x, 0)", "10")?;
    t.assert_eval("[1, [2, [3, [4]]]].flat(Infinity)", "1,2,3,4")?;
    t.assert_eval("[1, 2, 3].includes(2)", "true")?;
    t.assert_eval("[1, 2, 3].at(-1)", "3")?;
    t.assert_eval("Array.from('abc').reverse().join('')", "cba")?;
    t.assert_eval("Array.isArray([])", "true")?;
    let signals = t.run(
        r#"
        const items = ['a', 'b', 'c', 'd'];
        const removed = items.splice(1, 2, 'x');
        debug(removed.join('') + ':' + items.join(''));
        pass();
        "#,
    );
    assert_eq!(signals, vec![Signal::Debug("bc:axd".into()), Signal::Pass]);
    Ok(())
}

#[test]
fn string_builtins_index_by_character() -> Result<()> {
    let mut t = blank()?;
    t.assert_eval("'héllo'.length", "5")?;
    t.assert_eval("'héllo'.charAt(1)", "é")?;
    t.assert_eval("'héllo'.slice(-3)", "llo")?;
    t.assert_eval("'  pad '.trim()", "pad")?;
    t.assert_eval("'5'.padStart(3, '0')", "005")?;
    t.assert_eval("'a,b,,c'.split(',').length", "4")?;
    t.assert_eval("'Hello'.toUpperCase()", "HELLO")?;
    t.assert_eval("'abc'.includes('bc')", "true")?;
    t.assert_eval("'ab'.repeat(3)", "ababab")?;
    Ok(())
}

#[test]
fn regular_expressions_drive_replace_match_and_test() -> Result<()> {
    let mut t = blank()?;
    t.assert_eval("'a1b22'.replace(/\\d+/g, '#')", "a#b#")?;
    t.assert_eval("'Hello'.match(/l+/)[0]", "ll")?;
    t.assert_eval("/^[a-z]+$/i.test('MiXeD')", "true")?;
    t.assert_eval("'2024-05-06'.replace(/(\\d+)-(\\d+)-(\\d+)/, '$3/$2/$1')", "06/05/2024")?;
    t.assert_eval("'x-y-z'.split(/-/).length", "3")?;
    t.assert_eval("'aaa'.match(/a/g).length", "3")?;
    t.assert_eval("'abc'.search(/c/)", "2")?;
    Ok(())
}

#[test]
fn number_parsing_and_formatting() -> Result<()> {
    let mut t = blank()?;
    t.assert_eval("parseInt('42px')", "42")?;
    t.assert_eval("parseInt('0x1f')", "31")?;
    t.assert_eval("parseInt('101', 2)", "5")?;
    t.assert_eval("parseFloat('3.5rem')", "3.5")?;
    t.assert_eval("Number('')", "0")?;
    t.assert_eval("Number('12abc')", "NaN")?;
    t.assert_eval("(1234.5678).toFixed(2)", "1234.57")?;
    t.assert_eval("(255).toString(16)", "ff")?;
    t.assert_eval("Math.max(1, 5, 3)", "5")?;
    t.assert_eval("Math.round(2.5)", "3")?;
    t.assert_eval("Math.round(-2.5)", "-2")?;
    Ok(())
}

#[test]
fn json_round_trips_through_stringify_and_parse() -> Result<()> {
    let mut t = blank()?;
    t.assert_eval(
        "JSON.stringify({ a: 1, b: [1, 'x', null], c: undefined })",
        r#"{"a":1,"b":[1,"x",null]}"#,
    )?;
    t.assert_eval("JSON.parse('{\"x\": [1, 2]}').x[1]", "2")?;
    t.assert_eval("JSON.stringify('q\"uote')", r#""q\"uote""#)?;
    Ok(())
}

#[test]
fn dates_use_utc_and_iso_formatting() -> Result<()> {
    let mut t = blank()?;
    t.assert_eval("new Date(0).toISOString()", "1970-01-01T00:00:00.000Z")?;
    t.assert_eval("new Date(2020, 1, 29).getDate()", "29")?;
    t.assert_eval("new Date(2020, 1, 29).getMonth()", "1")?;
    t.assert_eval("new Date('2021-03-04T05:06:07Z').getUTCHours()", "5")?;
    t.assert_eval("typeof Date.now()", "number")?;
    Ok(())
}

#[test]
fn exceptions_carry_their_kind_and_message() -> Result<()> {
    let mut t = blank()?;
    let signals = t.run(
        r#"
        const seen = [];
        try { null.x; } catch (e) { seen.push(e instanceof TypeError); }
        try { missingName; } catch (e) { seen.push(e.name); }
        try { throw new RangeError('too far'); } catch (e) { seen.push(e.message); }
        try { throw 'plain'; } catch (e) { seen.push(e); } finally { seen.push('finally'); }
        debug(seen.join('|'));
        pass();
        "#,
    );
    assert_eq!(
        signals,
        vec![
            Signal::Debug("true|ReferenceError|too far|plain|finally".into()),
            Signal::Pass
        ]
    );
    Ok(())
}

#[test]
fn test_scripts_run_in_strict_mode() -> Result<()> {
    let mut t = blank()?;
    let signals = t.run("undeclaredName = 5;\npass();");
    assert!(
        matches!(&signals[0], Signal::Debug(msg) if msg.contains("undeclaredName is not defined"))
    );
    assert_eq!(signals[1], Signal::Fail(crate::page::SCRIPT_ERROR_REASON.into()));
    assert_eq!(signals.len(), 2);
    Ok(())
}

#[test]
fn const_bindings_reject_reassignment() -> Result<()> {
    let mut t = blank()?;
    let signals = t.run(
        r#"
        const fixed = 1;
        try { fixed = 2; } catch (e) { debug(e.name); }
        pass();
        "#,
    );
    assert_eq!(signals, vec![Signal::Debug("TypeError".into()), Signal::Pass]);
    Ok(())
}

#[test]
fn syntax_errors_become_a_generic_failure() -> Result<()> {
    let mut t = blank()?;
    let signals = t.run("pass(;");
    assert_eq!(signals.len(), 2);
    assert!(matches!(&signals[0], Signal::Debug(msg) if msg.starts_with("SyntaxError")));
    assert_eq!(signals[1], Signal::Fail(crate::page::SCRIPT_ERROR_REASON.into()));
    Ok(())
}

#[test]
fn deep_recursion_is_reported_instead_of_overflowing() -> Result<()> {
    let mut t = blank()?;
    let signals = t.run(
        r#"
        function down(n) { return down(n + 1); }
        try { down(0); } catch (e) { debug(e.name); }
        pass();
        "#,
    );
    assert_eq!(signals, vec![Signal::Debug("RangeError".into()), Signal::Pass]);
    Ok(())
}

#[test]
fn deeply_nested_expressions_fail_as_syntax_errors() -> Result<()> {
    let mut t = blank()?;
    let depth = 100_000;
    let source = format!("const x = {}1{};\npass();", "(".repeat(depth), ")".repeat(depth));
    let signals = t.run(&source);
    assert_eq!(signals.len(), 2);
    assert!(matches!(&signals[0], Signal::Debug(msg) if msg.starts_with("SyntaxError")));
    assert_eq!(signals[1], Signal::Fail(crate::page::SCRIPT_ERROR_REASON.into()));

    let unary = format!("const y = {}1;\npass();", "!".repeat(depth));
    assert_eq!(t.run(&unary).len(), 2);
    Ok(())
}

#[test]
fn moderately_nested_expressions_still_evaluate() -> Result<()> {
    let mut t = blank()?;
    let depth = 2_000;
    t.assert_eval(&format!("{}7{}", "(".repeat(depth), ")".repeat(depth)), "7")?;
    t.assert_eval(&format!("[{}]", "1 + ".repeat(depth) + "1"), &(depth + 1).to_string())?;
    t.assert_eval(&format!("{}[]{}.length", "[".repeat(500), "]".repeat(500)), "1")?;
    Ok(())
}

#[test]
fn circular_structures_are_rejected_by_json_stringify() -> Result<()> {
    let mut t = blank()?;
    let signals = t.run(
        r#"
        const node = { name: 'n' };
        node.self = node;
        try { JSON.stringify(node); } catch (e) { debug(e.name + ': ' + e.message); }
        const list = [1];
        list.push({ list });
        try { JSON.stringify(list, null, 2); } catch (e) { debug(e.name); }
        const shared = { a: 1 };
        debug(JSON.stringify([shared, { b: shared }]));
        pass();
        "#,
    );
    assert_eq!(
        signals,
        vec![
            Signal::Debug("TypeError: Converting circular structure to JSON".into()),
            Signal::Debug("TypeError".into()),
            Signal::Debug(r#"[{"a":1},{"b":{"a":1}}]"#.into()),
            Signal::Pass
        ]
    );
    Ok(())
}

#[test]
fn cyclic_arrays_stringify_and_flatten_without_overflowing() -> Result<()> {
    let mut t = blank()?;
    t.assert_eval("(() => { const a = [1, 2]; a.push(a); return a.join('-'); })()", "1-2-")?;
    t.assert_eval("(() => { const a = [3]; a.push(a); return `${a}` + (a + 1); })()", "3,3,1")?;
    let signals = t.run(
        r#"
        const a = [1];
        a.push(a);
        try { a.flat(Infinity); } catch (e) { debug(e.name); }
        debug(a.flat(1).length);
        pass();
        "#,
    );
    assert_eq!(
        signals,
        vec![Signal::Debug("RangeError".into()), Signal::Debug("3".into()), Signal::Pass]
    );
    Ok(())
}

#[test]
fn oversized_strings_throw_range_errors() -> Result<()> {
    let mut t = blank()?;
    let signals = t.run(
        r#"
        const errors = [];
        const attempt = (build) => {
            try { build(); errors.push('ok'); }
            catch (e) { errors.push(e.name + ': ' + e.message); }
        };
        attempt(() => 'x'.repeat(1e12));
        attempt(() => 'x'.padStart(1e12, 'ab'));
        attempt(() => ''.padEnd(2 ** 40));
        attempt(() => 'ab'.repeat(2 ** 28));
        attempt(() => 'x'.repeat(3).padEnd(6, '-'));
        debug(errors.join('|'));
        pass();
        "#,
    );
    let range = "RangeError: Invalid string length";
    assert_eq!(
        signals,
        vec![
            Signal::Debug(format!("{range}|{range}|{range}|{range}|ok")),
            Signal::Pass
        ]
    );
    Ok(())
}

#[test]
fn oversized_arrays_throw_range_errors() -> Result<()> {
    let mut t = blank()?;
    let signals = t.run(
        r#"
        const names = [];
        const attempt = (build) => {
            try { build(); names.push('ok'); } catch (e) { names.push(e.name); }
        };
        attempt(() => new Array(1e12));
        attempt(() => { const a = []; a.length = 1e12; });
        attempt(() => { const a = []; a.length = -1; });
        attempt(() => { const a = []; a[1e12] = 1; });
        attempt(() => {
            const a = new Array(3);
            a.length = 1;
            if (a.length !== 1) throw new Error();
        });
        debug(names.join(','));
        pass();
        "#,
    );
    assert_eq!(
        signals,
        vec![Signal::Debug("RangeError,RangeError,RangeError,RangeError,ok".into()), Signal::Pass]
    );
    Ok(())
}
