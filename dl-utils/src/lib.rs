pub mod builder;
pub mod nn;

/// Forwards `x` through each listed layer in order.
///
/// ```ignore
/// let y = pipe!(x, self.conv, self.bn, self.act);
/// ```
#[macro_export]
macro_rules! pipe {
    ($x:expr $(,$path:ident.$layer:ident)*$(,)?) => {{
        let x = $x;
        $(let x = $path.$layer.forward(x);)*
        x
    }};
}
